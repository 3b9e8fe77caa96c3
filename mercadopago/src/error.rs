//! Error types for the Mercado Pago client

use raffle_core::PaymentProviderError;
use thiserror::Error;

/// Errors that can occur when interacting with the Mercado Pago API
#[derive(Debug, Error)]
pub enum MercadoPagoError {
    /// No access token configured
    #[error("Missing Mercado Pago access token")]
    MissingAccessToken,

    /// HTTP request failed (connect, timeout, body read)
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// Response parsing failed
    #[error("Response parsing failed: {0}")]
    ResponseParseFailed(String),

    /// Rate limited - too many requests
    #[error("Rate limited - too many requests")]
    RateLimited,

    /// Unauthorized - invalid access token
    #[error("Unauthorized - invalid access token")]
    Unauthorized,

    /// API returned an error
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error body from the API
        message: String,
    },
}

impl From<MercadoPagoError> for PaymentProviderError {
    fn from(error: MercadoPagoError) -> Self {
        match error {
            MercadoPagoError::RequestFailed(_) | MercadoPagoError::RateLimited => {
                Self::Unavailable(error.to_string())
            }
            MercadoPagoError::ApiError { status, .. } if status >= 500 => {
                Self::Unavailable(error.to_string())
            }
            MercadoPagoError::ApiError { status, message } => Self::Rejected { status, message },
            MercadoPagoError::Unauthorized | MercadoPagoError::MissingAccessToken => {
                Self::Rejected {
                    status: 401,
                    message: error.to_string(),
                }
            }
            MercadoPagoError::ResponseParseFailed(message) => Self::InvalidResponse(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_outages_are_transient() {
        let transient = [
            MercadoPagoError::RequestFailed("timeout".to_string()),
            MercadoPagoError::RateLimited,
            MercadoPagoError::ApiError {
                status: 503,
                message: String::new(),
            },
        ];
        for error in transient {
            assert!(PaymentProviderError::from(error).is_transient());
        }

        let permanent = [
            MercadoPagoError::Unauthorized,
            MercadoPagoError::ResponseParseFailed("eof".to_string()),
            MercadoPagoError::ApiError {
                status: 400,
                message: "invalid expiration_date_to".to_string(),
            },
        ];
        for error in permanent {
            assert!(!PaymentProviderError::from(error).is_transient());
        }
    }
}
