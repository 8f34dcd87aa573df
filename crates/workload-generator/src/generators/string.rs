//! String generators: random strings and placeholder patterns.
//!
//! Pattern placeholders:
//! - `{uuid}` - UUID drawn from the random stream
//! - `{rand:N}` - random N-digit number

use super::uuid::uuid_from_rng;
use rand::Rng;
use workload_core::Value;

/// Default alphabet for `^RandomString`.
pub const DEFAULT_ALPHABET: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Generate a string of `length` characters drawn from `alphabet`.
pub fn generate_random_string<R: Rng>(rng: &mut R, length: usize, alphabet: &[char]) -> Value {
    let s: String = (0..length)
        .map(|_| alphabet[rng.random_range(0..alphabet.len())])
        .collect();
    Value::String(s)
}

/// Generate a string based on a pattern with placeholders.
pub fn generate_pattern<R: Rng>(pattern: &str, rng: &mut R) -> Value {
    let mut result = pattern.to_string();

    while result.contains("{uuid}") {
        result = result.replacen("{uuid}", &uuid_from_rng(rng).to_string(), 1);
    }

    let mut search_from = 0;
    while let Some(offset) = result[search_from..].find("{rand:") {
        let start = search_from + offset;
        let Some(end) = result[start..].find('}').map(|e| start + e) else {
            break;
        };
        match result[start + 6..end].parse::<usize>() {
            Ok(digits) => {
                let random_num = generate_random_digits(rng, digits);
                result = format!("{}{}{}", &result[..start], random_num, &result[end + 1..]);
                search_from = start + random_num.len();
            }
            // Not a placeholder; leave the text alone
            Err(_) => search_from = end + 1,
        }
    }

    Value::String(result)
}

/// Generate a random number with exactly N digits.
fn generate_random_digits<R: Rng>(rng: &mut R, digits: usize) -> String {
    let mut result = String::with_capacity(digits);

    for i in 0..digits {
        // No leading zero
        let low = if i == 0 { 1 } else { 0 };
        let digit: u32 = rng.random_range(low..10);
        result.push(char::from(b'0' + digit as u8));
    }

    result
}
