use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Ordering regime for strings. Every string comparison in the store goes
/// through [`collate_compare`]; nothing else may order strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CollateMode {
    #[default]
    None,
    Ascii,
    Numeric,
    Utf8,
    /// Characters listed earlier in the string sort earlier; anything not
    /// listed sorts after all listed characters, by code point.
    Custom(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CollateOpts {
    pub mode: CollateMode,
}

impl CollateOpts {
    pub fn new(mode: CollateMode) -> Self {
        CollateOpts { mode }
    }

    pub fn is_none(&self) -> bool {
        self.mode == CollateMode::None
    }
}

/// Compare two strings under the given collation.
pub fn collate_compare(a: &str, b: &str, opts: &CollateOpts) -> Ordering {
    match &opts.mode {
        CollateMode::None => a.cmp(b),
        CollateMode::Ascii => {
            let x = a.bytes().map(|c| c.to_ascii_lowercase());
            let y = b.bytes().map(|c| c.to_ascii_lowercase());
            x.cmp(y)
        }
        CollateMode::Utf8 => {
            let x = a.chars().flat_map(|c| c.to_lowercase());
            let y = b.chars().flat_map(|c| c.to_lowercase());
            x.cmp(y)
        }
        CollateMode::Numeric => {
            let (na, ra) = split_numeric(a);
            let (nb, rb) = split_numeric(b);
            na.total_cmp(&nb).then_with(|| ra.cmp(rb))
        }
        CollateMode::Custom(order) => {
            let ranks = rank_table(order);
            let x = a.chars().map(|c| char_rank(c, &ranks, order.chars().count()));
            let y = b.chars().map(|c| char_rank(c, &ranks, order.chars().count()));
            x.cmp(y)
        }
    }
}

/// Collation-normalized form of a string key. Ordered indexes store keys in
/// this form so the map order agrees with [`collate_compare`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SortKey {
    Plain(String),
    /// Leading number (total-order bits) plus the remainder.
    Numeric(u64, String),
    Ranked(Vec<u64>),
}

pub fn sort_key(s: &str, opts: &CollateOpts) -> SortKey {
    match &opts.mode {
        CollateMode::None => SortKey::Plain(s.to_string()),
        CollateMode::Ascii => SortKey::Plain(s.to_ascii_lowercase()),
        CollateMode::Utf8 => SortKey::Plain(s.to_lowercase()),
        CollateMode::Numeric => {
            let (n, rest) = split_numeric(s);
            SortKey::Numeric(ord_f64_bits(n), rest.to_string())
        }
        CollateMode::Custom(order) => {
            let ranks = rank_table(order);
            let len = order.chars().count();
            SortKey::Ranked(s.chars().map(|c| char_rank(c, &ranks, len)).collect())
        }
    }
}

/// Leading number of the string (0.0 when absent) plus the unparsed tail.
fn split_numeric(s: &str) -> (f64, &str) {
    let t = s.trim_start();
    let mut end = 0;
    let bytes = t.as_bytes();
    if end < bytes.len() && (bytes[end] == b'-' || bytes[end] == b'+') {
        end += 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        let frac = end + 1;
        let mut frac_end = frac;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        if frac_end > frac {
            end = frac_end;
        }
    }
    if end == digits_start {
        return (0.0, t);
    }
    match t[..end].parse::<f64>() {
        Ok(n) => (n, &t[end..]),
        Err(_) => (0.0, t),
    }
}

/// Map an f64 onto u64 bits whose unsigned order matches numeric order.
fn ord_f64_bits(v: f64) -> u64 {
    let bits = v.to_bits();
    if bits & (1 << 63) != 0 {
        !bits
    } else {
        bits | (1 << 63)
    }
}

fn rank_table(order: &str) -> HashMap<char, u64> {
    order
        .chars()
        .enumerate()
        .map(|(i, c)| (c, i as u64))
        .collect()
}

fn char_rank(c: char, ranks: &HashMap<char, u64>, table_len: usize) -> u64 {
    match ranks.get(&c) {
        Some(r) => *r,
        None => table_len as u64 + c as u64,
    }
}
