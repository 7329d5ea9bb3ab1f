//! RFC 4648 Base32（パディングなし）
//!
//! デコードは寛容モード: 大文字小文字を区別せず、`=` やアルファベット外の文字は
//! 読み飛ばす。

use data_encoding::BASE32_NOPAD;

const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// バイト列をパディングなしの Base32 文字列に変換
pub fn encode(bytes: &[u8]) -> String {
    BASE32_NOPAD.encode(bytes)
}

/// Base32 文字列をバイト列に変換（失敗しない）
///
/// 1バイトにも満たない末尾のシンボルと、余ったビットは捨てる。
pub fn decode(input: &str) -> Vec<u8> {
    let mut symbols: Vec<u8> = input
        .bytes()
        .map(|b| b.to_ascii_uppercase())
        .filter(|b| ALPHABET.contains(b))
        .collect();

    // 8シンボル単位で余りが 1, 3, 6 の場合、最後のシンボルは新しいバイトを作らない
    if matches!(symbols.len() % 8, 1 | 3 | 6) {
        symbols.pop();
    }

    // BASE32_NOPAD は未使用ビットが 0 であることを要求するので落としておく
    let unused_bits = (symbols.len() * 5) % 8;
    if let Some(last) = symbols.last_mut() {
        let value = symbol_value(*last);
        let mask = !((1u8 << unused_bits) - 1);
        *last = ALPHABET[usize::from(value & mask)];
    }

    BASE32_NOPAD.decode(&symbols).unwrap_or_default()
}

fn symbol_value(symbol: u8) -> u8 {
    match symbol {
        b'A'..=b'Z' => symbol - b'A',
        b'2'..=b'7' => symbol - b'2' + 26,
        _ => 0,
    }
}
