//! SCRAM-SHA-256 client exchange (RFC 5802, RFC 7677).
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// The number of random characters in the client nonce.
const NONCE_LEN: usize = 24;

const NONCE_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// An error during the SCRAM exchange.
#[derive(Debug, thiserror::Error)]
pub enum ScramError {
    #[error("malformed server-{0} message")]
    Malformed(&'static str),
    #[error("server nonce does not continue the client nonce")]
    NonceMismatch,
    #[error("server signature verification failed")]
    ServerSignature,
}

/// SCRAM-SHA-256 client state machine.
pub struct ScramClient {
    username: String,
    password: String,
    nonce: String,
    salted_password: Option<[u8; 32]>,
    auth_message: Option<String>,
}

impl ScramClient {
    /// A client with a fresh random nonce.
    ///
    /// The username in the exchange is left empty; postgres takes the user
    /// from the startup packet instead.
    pub fn new(password: &str) -> Self {
        let mut rng = rand::rng();
        let nonce = (0..NONCE_LEN)
            .map(|_| NONCE_ALPHABET[rng.random_range(0..NONCE_ALPHABET.len())] as char)
            .collect();
        Self::with_nonce("", password, nonce)
    }

    fn with_nonce(username: &str, password: &str, nonce: String) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            nonce,
            salted_password: None,
            auth_message: None,
        }
    }

    /// The client-first message: `n,,n=<user>,r=<nonce>`.
    pub fn client_first_message(&self) -> String {
        format!("n,,n={},r={}", self.username, self.nonce)
    }

    /// Process the server-first message (`r=<nonce>,s=<salt>,i=<iterations>`)
    /// and produce the client-final message carrying the proof.
    pub fn process_server_first(&mut self, server_first: &str) -> Result<String, ScramError> {
        let malformed = || ScramError::Malformed("first");

        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for part in server_first.split(',') {
            if let Some(value) = part.strip_prefix("r=") {
                nonce = Some(value);
            } else if let Some(value) = part.strip_prefix("s=") {
                salt = Some(BASE64.decode(value).map_err(|_| malformed())?);
            } else if let Some(value) = part.strip_prefix("i=") {
                iterations = Some(value.parse::<u32>().map_err(|_| malformed())?);
            }
        }
        let nonce = nonce.ok_or_else(malformed)?;
        let salt = salt.ok_or_else(malformed)?;
        let iterations = iterations.ok_or_else(malformed)?;

        if !nonce.starts_with(&self.nonce) {
            return Err(ScramError::NonceMismatch);
        }

        let mut salted = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(self.password.as_bytes(), &salt, iterations, &mut salted);
        self.salted_password = Some(salted);

        let client_key = hmac(&salted, b"Client Key");
        let stored_key = Sha256::digest(client_key);

        let auth_message = format!(
            "n={},r={},{server_first},c=biws,r={nonce}",
            self.username, self.nonce,
        );
        let client_signature = hmac(&stored_key, auth_message.as_bytes());
        self.auth_message = Some(auth_message);

        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(key, sig)| key ^ sig)
            .collect();

        Ok(format!("c=biws,r={nonce},p={}", BASE64.encode(proof)))
    }

    /// Verify the server signature of the server-final message (`v=<sig>`).
    pub fn verify_server_final(&self, server_final: &str) -> Result<(), ScramError> {
        let malformed = || ScramError::Malformed("final");

        let verifier = server_final.strip_prefix("v=").ok_or_else(malformed)?;
        let signature = BASE64.decode(verifier.trim_end()).map_err(|_| malformed())?;

        let salted = self.salted_password.ok_or_else(malformed)?;
        let auth_message = self.auth_message.as_ref().ok_or_else(malformed)?;

        let server_key = hmac(&salted, b"Server Key");
        let expected = hmac(&server_key, auth_message.as_bytes());

        if expected[..] != signature[..] {
            return Err(ScramError::ServerSignature);
        }
        Ok(())
    }
}

fn hmac(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key size");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

#[cfg(test)]
mod test {
    use super::*;

    // RFC 7677 section 3 test vector.
    const PASSWORD: &str = "pencil";
    const CLIENT_NONCE: &str = "rOprNGfwEbeRWgbNEkqO";
    const SERVER_FIRST: &str =
        "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
    const SERVER_FINAL: &str = "v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=";

    #[test]
    fn rfc7677_exchange() {
        let mut client = ScramClient::with_nonce("user", PASSWORD, CLIENT_NONCE.into());
        assert_eq!(
            client.client_first_message(),
            format!("n,,n=user,r={CLIENT_NONCE}"),
        );

        let client_final = client.process_server_first(SERVER_FIRST).unwrap();
        assert_eq!(
            client_final,
            "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
             p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ=",
        );

        client.verify_server_final(SERVER_FINAL).unwrap();
    }

    #[test]
    fn empty_username_in_driver_exchange() {
        let client = ScramClient::new(PASSWORD);
        assert_eq!(
            client.client_first_message(),
            format!("n,,n=,r={}", client.nonce),
        );
    }

    #[test]
    fn bad_server_signature() {
        let mut client = ScramClient::with_nonce("user", PASSWORD, CLIENT_NONCE.into());
        client.process_server_first(SERVER_FIRST).unwrap();
        let err = client.verify_server_final("v=AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=");
        assert!(matches!(err, Err(ScramError::ServerSignature)));
    }

    #[test]
    fn nonce_must_continue() {
        let mut client = ScramClient::with_nonce("", PASSWORD, "abcdef".into());
        let err = client.process_server_first("r=zzzzzz,s=c2FsdA==,i=4096");
        assert!(matches!(err, Err(ScramError::NonceMismatch)));
    }

    #[test]
    fn generated_nonce_alphabet() {
        let client = ScramClient::new("pw");
        assert_eq!(client.nonce.len(), NONCE_LEN);
        assert!(client.nonce.bytes().all(|b| NONCE_ALPHABET.contains(&b)));
    }
}
