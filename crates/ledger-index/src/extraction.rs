//! Universal auto-keyword extraction and category classification, run once
//! per block at append time. Deliberately dependency-free: the patterns
//! involved (ISO dates, numerals, email shapes, uppercase codes) are simple
//! enough that a hand-written scanner is clearer than pulling in a regex
//! engine for five small rules.

use std::collections::{BTreeMap, BTreeSet};

use ledger_core::{Block, Category, IndexEntry, SizeBucket, CIPHERTEXT_TOKEN_CAP};

fn is_iso_date(tok: &str) -> bool {
    // YYYY-MM-DD
    let bytes = tok.as_bytes();
    if bytes.len() != 10 {
        return false;
    }
    let digits = |r: std::ops::Range<usize>| bytes[r].iter().all(|b| b.is_ascii_digit());
    digits(0..4) && bytes[4] == b'-' && digits(5..7) && bytes[7] == b'-' && digits(8..10)
}

fn is_decimal_numeral(tok: &str) -> bool {
    !tok.is_empty()
        && tok.chars().all(|c| c.is_ascii_digit() || c == '.')
        && tok.chars().any(|c| c.is_ascii_digit())
}

fn is_email_shaped(tok: &str) -> bool {
    match tok.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    }
}

fn is_uppercase_code(tok: &str) -> bool {
    tok.len() >= 3 && tok.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        && tok.chars().any(|c| c.is_ascii_alphabetic())
}

/// Split on whitespace and common punctuation, keeping internal `-`, `.`,
/// `@` so dates, numerals, and emails survive as single tokens.
fn tokenize(text: &str) -> Vec<&str> {
    text.split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | ':' | '(' | ')' | '[' | ']' | '"' | '\''))
        .filter(|t| !t.is_empty())
        .collect()
}

/// Extract the universal auto-keyword set from plaintext. Order is not
/// significant; callers store the result in a set.
pub fn extract_auto_keywords(text: &str) -> Vec<String> {
    let mut found = BTreeSet::new();
    for tok in tokenize(text) {
        let trimmed = tok.trim_matches(|c: char| matches!(c, '.' | ','));
        if trimmed.is_empty() {
            continue;
        }
        if is_iso_date(trimmed) || is_decimal_numeral(trimmed) || is_email_shaped(trimmed) || is_uppercase_code(trimmed) {
            found.insert(trimmed.to_string());
        }
    }
    found.into_iter().collect()
}

/// Extract the `auto_keywords` set for an encrypted block: fixed-width hex
/// chunks of the sidecar ciphertext, never the plaintext. These tokens carry
/// no semantic content — they only let the index notice "this ciphertext
/// reappeared" — which is the point: an encrypted block's keywords must
/// never be derivable back to its content without the decryption key.
pub fn extract_ciphertext_tokens(ciphertext: &[u8]) -> Vec<String> {
    let hex = hex::encode(ciphertext);
    let mut tokens = BTreeSet::new();
    for chunk in hex.as_bytes().chunks(16) {
        if chunk.len() == 16 {
            tokens.insert(String::from_utf8_lossy(chunk).into_owned());
        }
        if tokens.len() >= CIPHERTEXT_TOKEN_CAP {
            break;
        }
    }
    tokens.into_iter().collect()
}

const MEDICAL_LEXICON: &[&str] = &["patient", "diagnosis", "treatment", "medication", "clinical", "symptom", "dosage"];
const FINANCE_LEXICON: &[&str] = &["invoice", "payment", "account", "balance", "transaction", "ledger", "audit"];
const TECHNICAL_LEXICON: &[&str] = &["system", "server", "deploy", "build", "config", "database", "api"];
const LEGAL_LEXICON: &[&str] = &["contract", "agreement", "clause", "liability", "jurisdiction", "plaintiff", "statute"];

/// Classify plaintext into a category by lexicon dominance: whichever
/// lexicon has the most case-insensitive hits wins; ties and zero hits fall
/// through to `Category::Other`.
pub fn classify_category(text: &str) -> Category {
    let lower = text.to_lowercase();
    let count = |lexicon: &[&str]| lexicon.iter().filter(|word| lower.contains(*word)).count();

    let scores = [
        (Category::Medical, count(MEDICAL_LEXICON)),
        (Category::Finance, count(FINANCE_LEXICON)),
        (Category::Technical, count(TECHNICAL_LEXICON)),
        (Category::Legal, count(LEGAL_LEXICON)),
    ];

    match scores.iter().max_by_key(|(_, score)| *score) {
        Some((category, score)) if *score > 0 => *category,
        _ => Category::Other,
    }
}

/// Build a block's `IndexEntry`. `off_chain_threshold` comes from the
/// process-wide config so buckets stay consistent with placement decisions
/// made at append time.
///
/// `public_tokens` covers plaintext on-chain `data` plus `auto_keywords`;
/// `private_tokens` covers only `auto_keywords`, since for an encrypted
/// block those are the sole terms derivable without the signer's key. A
/// block's own plaintext never contributes to `private_tokens` when
/// unencrypted — there is nothing private about it.
pub fn build_index_entry(block: &Block, off_chain_threshold: usize) -> IndexEntry {
    let mut public_tokens = BTreeSet::new();
    if !block.is_encrypted {
        for tok in tokenize(&block.data) {
            let lower = tok.trim_matches(|c: char| matches!(c, '.' | ',')).to_lowercase();
            if lower.len() >= 3 {
                public_tokens.insert(lower);
            }
        }
    }
    for kw in &block.auto_keywords {
        public_tokens.insert(kw.to_lowercase());
    }

    let private_tokens: BTreeSet<String> = block.auto_keywords.iter().map(|k| k.to_lowercase()).collect();

    let mut keywords_by_category: BTreeMap<Category, BTreeSet<String>> = BTreeMap::new();
    keywords_by_category
        .entry(block.category)
        .or_default()
        .extend(block.auto_keywords.iter().cloned());

    let size_bucket = SizeBucket::for_len(block.data.len(), off_chain_threshold);

    IndexEntry {
        block_number: block.number,
        public_tokens,
        private_tokens,
        keywords_by_category,
        size_bucket,
        signer_fingerprint: block.signer_public_key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_iso_date_and_email() {
        let kws = extract_auto_keywords("submitted on 2024-03-14 by alice@example.com");
        assert!(kws.contains(&"2024-03-14".to_string()));
        assert!(kws.contains(&"alice@example.com".to_string()));
    }

    #[test]
    fn extracts_uppercase_code_and_numeral() {
        let kws = extract_auto_keywords("reference ABC123 totaling 42.50 units");
        assert!(kws.contains(&"ABC123".to_string()));
        assert!(kws.contains(&"42.50".to_string()));
    }

    #[test]
    fn classifies_medical_text() {
        assert_eq!(classify_category("patient diagnosis shows clinical symptoms"), Category::Medical);
    }

    #[test]
    fn classifies_other_when_no_lexicon_hits() {
        assert_eq!(classify_category("the quick brown fox jumps"), Category::Other);
    }

    #[test]
    fn ciphertext_tokens_never_contain_plaintext() {
        let plaintext = b"patient diagnosis: ABC123, 2024-03-14";
        let tokens = extract_ciphertext_tokens(plaintext);
        for tok in &tokens {
            assert!(!String::from_utf8_lossy(plaintext).contains(tok.as_str()));
        }
        assert!(tokens.len() <= CIPHERTEXT_TOKEN_CAP);
    }
}
