//! Dash-pair symbol helpers (`BTC-USD` → base `BTC`, quote `USD`).

/// Base asset of a symbol. Plain symbols are their own base.
pub fn base_asset(symbol: &str) -> &str {
    symbol.split_once('-').map_or(symbol, |(base, _)| base)
}

/// Quote asset of a dash-pair symbol, `None` for plain symbols.
pub fn quote_asset(symbol: &str) -> Option<&str> {
    symbol.split_once('-').map(|(_, quote)| quote)
}

/// Symbol used to price `asset` in `quote`.
pub fn pair_symbol(asset: &str, quote: &str, uses_pairs: bool) -> String {
    if uses_pairs {
        format!("{asset}-{quote}")
    } else {
        asset.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_dash_pairs() {
        assert_eq!(base_asset("BTC-USD"), "BTC");
        assert_eq!(quote_asset("BTC-USD"), Some("USD"));
    }

    #[test]
    fn plain_symbols_have_no_quote() {
        assert_eq!(base_asset("AAPL"), "AAPL");
        assert_eq!(quote_asset("AAPL"), None);
    }

    #[test]
    fn pair_symbol_respects_exchange_style() {
        assert_eq!(pair_symbol("ETH", "USD", true), "ETH-USD");
        assert_eq!(pair_symbol("AAPL", "USD", false), "AAPL");
    }
}
