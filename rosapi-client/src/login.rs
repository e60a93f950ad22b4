//! MD5 challenge/response login.
//!
//! ```text
//! client                              router
//!   /login                  ------->
//!                           <-------  !done =ret=<32 hex chars>
//!   /login =name=<user>
//!     =response=00<md5 hex> ------->
//!                           <-------  !done | !trap =message=...
//! ```
//!
//! The digest is MD5 over a single zero byte, the password bytes and the 16
//! challenge bytes.

use crate::credentials::Credentials;
use crate::error::ClientError;
use crate::event::LoginState;
use md5::{Digest, Md5};
use rosapi_protocol::sentence::encode_word;
use rosapi_protocol::{ResultType, Sentence};
use zeroize::Zeroizing;

/// Command word of both login sentences.
pub const LOGIN_COMMAND: &str = "/login";

/// Length of the hex-encoded challenge.
const CHALLENGE_HEX_LEN: usize = 32;

/// What the connection must do after the login machine saw a sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginStep {
    /// Send this sentence, untagged.
    Send(Sentence),
    /// The router accepted the credentials.
    LoggedIn,
    /// The sentence was not meant for the login machine.
    Ignored,
}

/// Login sub-state machine of a single connection.
#[derive(Debug, Default)]
pub struct Login {
    state: LoginState,
    credentials: Option<Credentials>,
}

impl Login {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LoginState {
        self.state
    }

    /// Starts the handshake and returns the initial `/login` sentence.
    ///
    /// The credentials are held only until the challenge arrives.
    pub fn begin(&mut self, credentials: Credentials) -> Sentence {
        self.credentials = Some(credentials);
        self.state = LoginState::LoginRequested;
        Sentence::new(LOGIN_COMMAND)
    }

    /// Advances the handshake with a sentence received from the router.
    ///
    /// On error the machine is back in [`LoginState::NoLogin`] and the
    /// connection must be closed.
    pub fn handle(&mut self, sentence: &Sentence) -> Result<LoginStep, ClientError> {
        let result = match self.state {
            LoginState::NoLogin => return Ok(LoginStep::Ignored),
            LoginState::LoginRequested => self.answer_challenge(sentence),
            LoginState::CredentialsSent => check_verdict(sentence).map(|()| {
                self.state = LoginState::LoggedIn;
                LoginStep::LoggedIn
            }),
            LoginState::LoggedIn => {
                return Err(ClientError::IllegalState("router is logged in already"));
            }
        };

        if result.is_err() {
            self.abort();
        }
        result
    }

    /// Returns whether credentials are waiting for the challenge.
    pub fn holds_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    /// Drops back to [`LoginState::NoLogin`], discarding any credentials.
    pub fn abort(&mut self) {
        self.state = LoginState::NoLogin;
        self.credentials = None;
    }

    fn answer_challenge(&mut self, sentence: &Sentence) -> Result<LoginStep, ClientError> {
        let challenge = validate_challenge(sentence)?;
        let credentials = self
            .credentials
            .take()
            .ok_or(ClientError::IllegalState("no credentials for pending login"))?;

        let password = Zeroizing::new(encode_word(&credentials.password));
        let response = challenge_response(&password, challenge)?;
        self.state = LoginState::CredentialsSent;

        Ok(LoginStep::Send(
            Sentence::new(LOGIN_COMMAND)
                .with_attribute("name", credentials.user.as_str())
                .with_attribute("response", response),
        ))
    }
}

/// Checks the reply to the first `/login` and returns its challenge.
pub fn validate_challenge(sentence: &Sentence) -> Result<&str, ClientError> {
    if sentence.result_type() != ResultType::Done {
        return Err(ClientError::InvalidLoginResponse("cannot login"));
    }
    if sentence.attributes().count() != 1 {
        return Err(ClientError::InvalidLoginResponse(
            "expected exactly one attribute",
        ));
    }
    let challenge = sentence
        .attributes()
        .get("ret")
        .filter(|ret| !ret.is_empty())
        .ok_or(ClientError::InvalidLoginResponse(
            "doesn't receive 'ret' namefield",
        ))?;
    if challenge.len() != CHALLENGE_HEX_LEN {
        return Err(ClientError::InvalidLoginResponse(
            "'ret' field doesn't contain 32 characters",
        ));
    }
    Ok(challenge)
}

/// Computes the `=response=` value: `00` followed by the hex MD5 digest of
/// a zero byte, the password and the binary challenge.
pub fn challenge_response(password: &[u8], challenge_hex: &str) -> Result<String, ClientError> {
    let challenge = hex::decode(challenge_hex).map_err(|_| {
        ClientError::InvalidLoginResponse("'ret' field is not hexadecimal")
    })?;

    let mut hasher = Md5::new();
    hasher.update([0u8]);
    hasher.update(password);
    hasher.update(&challenge);

    Ok(format!("00{}", hex::encode(hasher.finalize())))
}

/// Interprets the router's answer to the credentials.
fn check_verdict(sentence: &Sentence) -> Result<(), ClientError> {
    if sentence.result_type() == ResultType::Done {
        return Ok(());
    }
    let message = sentence
        .attributes()
        .get("message")
        .map(str::to_string);
    Err(ClientError::AuthenticationFailed(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHALLENGE: &str = "0123456789abcdef0123456789abcdef";

    fn challenge_sentence() -> Sentence {
        Sentence::new("!done").with_attribute("ret", CHALLENGE)
    }

    #[test]
    fn test_challenge_response_empty_password() {
        let response = challenge_response(b"", CHALLENGE).unwrap();
        assert_eq!(response, "00fcb4c16e4375c2590775f3dee281da6b");
    }

    #[test]
    fn test_challenge_response_with_password() {
        let response = challenge_response(b"secret", CHALLENGE).unwrap();
        assert_eq!(response, "00ebbe7c3df6b3d902bfd1f355c6e63289");
    }

    #[test]
    fn test_challenge_response_not_hex() {
        let result = challenge_response(b"", &"zz".repeat(16));
        assert!(matches!(
            result,
            Err(ClientError::InvalidLoginResponse(_))
        ));
    }

    #[test]
    fn test_validate_challenge() {
        assert_eq!(validate_challenge(&challenge_sentence()).unwrap(), CHALLENGE);

        let not_done = Sentence::new("!trap").with_attribute("ret", CHALLENGE);
        assert!(validate_challenge(&not_done).is_err());

        let extra = challenge_sentence().with_attribute("other", "1");
        assert!(validate_challenge(&extra).is_err());

        let missing = Sentence::new("!done").with_attribute("message", "x");
        let err = validate_challenge(&missing).unwrap_err();
        assert!(err.to_string().contains("'ret'"));

        let short = Sentence::new("!done").with_attribute("ret", "abcd");
        let err = validate_challenge(&short).unwrap_err();
        assert!(err.to_string().contains("32"));
    }

    #[test]
    fn test_full_handshake() {
        let mut login = Login::new();
        assert_eq!(login.state(), LoginState::NoLogin);

        let request = login.begin(Credentials::new("admin", ""));
        assert_eq!(request, Sentence::new("/login"));
        assert_eq!(login.state(), LoginState::LoginRequested);

        let step = login.handle(&challenge_sentence()).unwrap();
        let expected = Sentence::new("/login")
            .with_attribute("name", "admin")
            .with_attribute("response", "00fcb4c16e4375c2590775f3dee281da6b");
        assert_eq!(step, LoginStep::Send(expected));
        assert_eq!(login.state(), LoginState::CredentialsSent);
        // Credentials are gone once the response is computed
        assert!(login.credentials.is_none());

        let step = login.handle(&Sentence::new("!done")).unwrap();
        assert_eq!(step, LoginStep::LoggedIn);
        assert_eq!(login.state(), LoginState::LoggedIn);
    }

    #[test]
    fn test_rejected_credentials() {
        let mut login = Login::new();
        login.begin(Credentials::new("admin", "wrong"));
        login.handle(&challenge_sentence()).unwrap();

        let trap =
            Sentence::new("!trap").with_attribute("message", "invalid user name or password");
        let err = login.handle(&trap).unwrap_err();

        assert!(matches!(
            &err,
            ClientError::AuthenticationFailed(Some(msg)) if msg == "invalid user name or password"
        ));
        assert_eq!(login.state(), LoginState::NoLogin);
    }

    #[test]
    fn test_malformed_challenge_aborts() {
        let mut login = Login::new();
        login.begin(Credentials::new("admin", ""));

        let err = login.handle(&Sentence::new("!done")).unwrap_err();
        assert!(err.is_protocol_violation());
        assert_eq!(login.state(), LoginState::NoLogin);
        assert!(login.credentials.is_none());
    }

    #[test]
    fn test_sentences_outside_login() {
        let mut login = Login::new();
        assert_eq!(
            login.handle(&Sentence::new("!done")).unwrap(),
            LoginStep::Ignored
        );

        login.begin(Credentials::new("admin", ""));
        login.handle(&challenge_sentence()).unwrap();
        login.handle(&Sentence::new("!done")).unwrap();

        let err = login.handle(&Sentence::new("!re")).unwrap_err();
        assert!(matches!(err, ClientError::IllegalState(_)));
        // An illegal call leaves the established login alone
        assert_eq!(login.state(), LoginState::LoggedIn);
    }
}
