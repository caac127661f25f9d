//! Failure modes for webhook signature verification.

use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum WebhookError {
    #[snafu(display("configured public key is not valid PEM or base64 SPKI: {reason}"))]
    InvalidKey { reason: String },

    #[snafu(display("signature header is not valid base64: {source}"))]
    InvalidSignatureEncoding { source: base64::DecodeError },

    #[snafu(display("signature bytes are not a well-formed ECDSA signature: {reason}"))]
    MalformedSignature { reason: String },

    #[snafu(display("timestamp header is not a valid integer: {value}"))]
    InvalidTimestamp { value: String },
}
