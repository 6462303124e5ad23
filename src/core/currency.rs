//! Display currency helpers

/// Normalizes a currency code the way the market API expects it, e.g. `USD` to `usd`.
pub fn normalize(code: &str) -> String {
    code.trim().to_lowercase()
}

/// Symbol shown next to prices for a currency code.
pub fn display_symbol(code: &str) -> String {
    let symbol = match normalize(code).as_str() {
        "usd" | "aud" | "cad" | "nzd" | "sgd" | "hkd" => "$",
        "eur" => "€",
        "gbp" => "£",
        "jpy" | "cny" => "¥",
        "inr" => "₹",
        "rub" => "₽",
        "krw" => "₩",
        "btc" => "₿",
        "eth" => "Ξ",
        other => return other.to_uppercase(),
    };
    symbol.to_string()
}
