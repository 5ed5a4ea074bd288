//! Move payload validation.
//!
//! Client payloads are untrusted text. They are validated into a strict
//! `MoveRequest` before reaching the rules engine:
//! - `from` / `to` must be square names (`a1`..`h8`): REJECT
//! - `from == to`: REJECT
//! - Promotion, when present and non-empty, must be `q`, `r`, `b` or `n`: REJECT
//!
//! Rejections surface to the submitter as an illegal move.

use kingside_rules::{MoveRequest, Promotion, Square};
use kingside_wire::MovePayload;

/// Why a payload was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("invalid {field} square {value:?}")]
    BadSquare { field: &'static str, value: String },
    #[error("from and to are the same square")]
    SameSquare,
    #[error("invalid promotion piece {0:?}")]
    BadPromotion(String),
}

/// Validate a move payload.
pub fn validate_move(payload: &MovePayload) -> Result<MoveRequest, PayloadError> {
    let from = parse_square("from", &payload.from)?;
    let to = parse_square("to", &payload.to)?;
    if from == to {
        return Err(PayloadError::SameSquare);
    }

    let promotion = match payload.promotion.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(letter) => Some(
            Promotion::from_letter(letter)
                .ok_or_else(|| PayloadError::BadPromotion(letter.to_string()))?,
        ),
    };

    Ok(MoveRequest::new(from, to, promotion))
}

fn parse_square(field: &'static str, value: &str) -> Result<Square, PayloadError> {
    Square::parse(value.trim()).ok_or_else(|| PayloadError::BadSquare {
        field,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_move() {
        let request = validate_move(&MovePayload::new("e2", "e4", None)).unwrap();
        assert_eq!(request.uci(), "e2e4");
    }

    #[test]
    fn test_valid_promotion() {
        let request = validate_move(&MovePayload::new("a7", "a8", Some("Q"))).unwrap();
        assert_eq!(request.promotion, Some(Promotion::Queen));
    }

    #[test]
    fn test_empty_promotion_is_none() {
        let request = validate_move(&MovePayload::new("a7", "a8", Some(""))).unwrap();
        assert_eq!(request.promotion, None);
    }

    #[test]
    fn test_bad_square_rejected() {
        let result = validate_move(&MovePayload::new("i9", "e4", None));
        assert!(matches!(
            result,
            Err(PayloadError::BadSquare { field: "from", .. })
        ));

        let result = validate_move(&MovePayload::new("e2", "", None));
        assert!(matches!(
            result,
            Err(PayloadError::BadSquare { field: "to", .. })
        ));
    }

    #[test]
    fn test_same_square_rejected() {
        let result = validate_move(&MovePayload::new("e2", "e2", None));
        assert_eq!(result, Err(PayloadError::SameSquare));
    }

    #[test]
    fn test_bad_promotion_rejected() {
        let result = validate_move(&MovePayload::new("a7", "a8", Some("k")));
        assert_eq!(result, Err(PayloadError::BadPromotion("k".to_string())));
    }

    /// Malformed payloads never panic.
    #[test]
    fn test_malformed_payloads_no_crash() {
        let payloads = [
            MovePayload::new("", "", None),
            MovePayload::new("e", "4", None),
            MovePayload::new("e22", "e4", None),
            MovePayload::new("é2", "e4", None),
            MovePayload::new("e2", "e4", Some("queen")),
            MovePayload::new("\u{0}", "\u{ffff}", Some("\u{0}")),
        ];
        for payload in &payloads {
            let _ = validate_move(payload);
        }
    }
}
