//! Kubernetes resource quantity validation.

use std::sync::LazyLock;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use regex::Regex;

use super::ConfigError;

/// `<sign><number><suffix>` where suffix is a binary SI, decimal SI or decimal
/// exponent suffix, or empty.
static QUANTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[+-]?(?:[0-9]+(?:\.[0-9]*)?|\.[0-9]+)(?:Ki|Mi|Gi|Ti|Pi|Ei|n|u|m|k|M|G|T|P|E|[eE][+-]?[0-9]+)?$",
    )
    .expect("Failed to compile quantity regex - this should never happen")
});

/// Parse `raw` as a Kubernetes quantity
pub fn parse_quantity(raw: &str) -> Result<Quantity, ConfigError> {
    let trimmed = raw.trim();
    if QUANTITY_RE.is_match(trimmed) {
        Ok(Quantity(trimmed.to_string()))
    } else {
        Err(ConfigError::InvalidQuantity(raw.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_quantities() {
        for q in ["1Gi", "500Mi", "10G", "1.5Gi", "100", "1e3", "2E6", "0.5", ".5Ti", "100m", "+1Ki"] {
            assert_eq!(parse_quantity(q).unwrap().0, q, "quantity {q} should parse");
        }
    }

    #[test]
    fn test_parse_small_decimal_suffixes() {
        for q in ["500u", "250n", "1.5u"] {
            assert_eq!(parse_quantity(q).unwrap().0, q, "quantity {q} should parse");
        }
        assert!(parse_quantity("5U").is_err());
    }

    #[test]
    fn test_parse_trims_whitespace() {
        assert_eq!(parse_quantity(" 2Gi ").unwrap().0, "2Gi");
    }

    #[test]
    fn test_parse_invalid_quantities() {
        for q in ["", "Gi", "1GB", "one", "1 Gi", "1..5Gi", "1Gii", "--1"] {
            assert!(
                matches!(parse_quantity(q), Err(ConfigError::InvalidQuantity(_))),
                "quantity {q:?} should be rejected"
            );
        }
    }
}
