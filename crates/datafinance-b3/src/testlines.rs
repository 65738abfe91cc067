//! Builders for well-formed 245-byte COTAHIST lines used across tests.

/// A type-01 quote line with the given trading date (`YYYYMMDD`), ticker,
/// TPMERC code, and raw 13-character closing price.
pub fn quote_line(date: &str, ticker: &str, market_type: &str, closing_raw: &str) -> Vec<u8> {
    let mut line = String::with_capacity(245);
    line.push_str("01");
    line.push_str(date);
    line.push_str("02"); // BDI: lote padrão
    line.push_str(&format!("{ticker:<12}"));
    line.push_str(market_type);
    line.push_str(&format!("{:<12}", "PETROBRAS"));
    line.push_str(&format!("{:<10}", "PN"));
    line.push_str(&" ".repeat(7)); // prazo termo
    line.push_str("0000000027500"); // opening
    line.push_str("0000000028000"); // high
    line.push_str("0000000027300"); // low
    line.push_str("0000000027700"); // avg
    line.push_str(&format!("{closing_raw:>13}"));
    line.push_str("0000000027750"); // best bid
    line.push_str("0000000027800"); // best ask
    line.push_str("00150"); // trade count
    line.push_str("000000000000012300"); // total quantity
    line.push_str("000000000341550000"); // total volume
    line.push_str(&"0".repeat(13)); // strike price
    line.push('0'); // strike correction indicator
    line.push_str("00000000"); // expiration date
    line.push_str("0000001"); // quote factor
    line.push_str(&"0".repeat(13)); // strike price in points
    line.push_str("BRPETRACNPR6"); // ISIN
    line.push_str("144"); // distribution number
    debug_assert_eq!(line.len(), 245);
    line.into_bytes()
}

/// A header (type-00) line.
pub fn header_line() -> Vec<u8> {
    let mut line = String::with_capacity(245);
    line.push_str("00COTAHIST.2023BOVESPA 20230102");
    while line.len() < 245 {
        line.push(' ');
    }
    line.into_bytes()
}

/// A trailer (type-99) line.
pub fn trailer_line() -> Vec<u8> {
    let mut line = String::with_capacity(245);
    line.push_str("99COTAHIST.2023BOVESPA 2023010200000000003");
    while line.len() < 245 {
        line.push(' ');
    }
    line.into_bytes()
}
