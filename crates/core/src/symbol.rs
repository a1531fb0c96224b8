//! Symbol normalization helpers.
//!
//! Every venue spells the same market differently (`BTC`, `BTCUSDT`,
//! `BTC-USD-PERP`, `BTC_USDC_PERP`). Venue clients own the exact mapping via
//! [`crate::traits::VenueClient::venue_symbol`]; this module provides the
//! shared base-asset extraction they build on, and the comparison used by
//! components that see quotes from multiple venues at once.

/// Quote/settlement suffixes stripped during normalization.
const QUOTE_SUFFIXES: &[&str] = &["USDT", "USDC", "USD", "PERP"];

/// Extracts the normalized base asset from any venue spelling.
///
/// `BTCUSDT`, `BTC-USD-PERP`, and `BTC_USDC_PERP` all normalize to `BTC`.
#[must_use]
pub fn normalize(venue_symbol: &str) -> String {
    let mut base = venue_symbol.trim().to_ascii_uppercase();

    // Separator-delimited formats: keep the leading segment.
    if let Some(first) = base.split(['-', '_', '/']).next() {
        base = first.to_string();
    }

    // Concatenated formats: strip known quote suffixes.
    loop {
        let mut stripped = false;
        for suffix in QUOTE_SUFFIXES {
            if base.len() > suffix.len() && base.ends_with(suffix) {
                base.truncate(base.len() - suffix.len());
                stripped = true;
            }
        }
        if !stripped {
            break;
        }
    }

    base
}

/// Returns true when two symbols, possibly in different venue formats,
/// refer to the same underlying.
#[must_use]
pub fn same_underlying(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_common_venue_formats() {
        assert_eq!(normalize("BTC"), "BTC");
        assert_eq!(normalize("BTCUSDT"), "BTC");
        assert_eq!(normalize("BTC-USD-PERP"), "BTC");
        assert_eq!(normalize("BTC_USDC_PERP"), "BTC");
        assert_eq!(normalize("btcusdt"), "BTC");
    }

    #[test]
    fn strips_stacked_suffixes() {
        // Some venues concatenate settlement and contract markers.
        assert_eq!(normalize("ETHUSDTPERP"), "ETH");
    }

    #[test]
    fn does_not_empty_out_degenerate_names() {
        // A symbol that IS a suffix must survive normalization.
        assert_eq!(normalize("USDT"), "USDT");
    }

    #[test]
    fn same_underlying_across_formats() {
        assert!(same_underlying("BTCUSDT", "BTC-USD-PERP"));
        assert!(same_underlying("btc", "BTC_USDC_PERP"));
        assert!(!same_underlying("BTCUSDT", "ETHUSDT"));
    }
}
