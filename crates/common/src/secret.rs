//! Secret types for values that must never reach logs.
//!
//! Re-exports [`secrecy`]. `SecretString` redacts itself in `Debug`, so any
//! config or client struct that derives `Debug` stays safe to log. Callers
//! must go through [`ExposeSecret::expose_secret`] to read the value.
//!
//! Use `SecretString` for the media API secret, the user-token signing
//! secret and database URLs carrying credentials.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! let api_secret = SecretString::from("livekit-secret");
//! assert!(format!("{api_secret:?}").contains("REDACTED"));
//! assert_eq!(api_secret.expose_secret(), "livekit-secret");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("devkey-secret");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("devkey-secret"));
    }

    #[test]
    fn test_clone_keeps_value() {
        let secret = SecretString::from("signing-key");
        let cloned = secret.clone();
        assert_eq!(cloned.expose_secret(), "signing-key");
    }

    #[test]
    fn test_struct_with_secret_is_safe() {
        #[allow(dead_code)]
        #[derive(Debug)]
        struct MediaCredentials {
            api_key: String,
            api_secret: SecretString,
        }

        let creds = MediaCredentials {
            api_key: "APIkey".to_string(),
            api_secret: SecretString::from("very-secret"),
        };

        let debug_str = format!("{creds:?}");
        assert!(debug_str.contains("APIkey"));
        assert!(!debug_str.contains("very-secret"));
    }
}
