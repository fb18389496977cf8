use ledger_core::LedgerError;

/// Three search levels, in increasing cost. Each level's guarantees subsume
/// the one below it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchLevel {
    /// Index only. Sub-10ms for common queries.
    FastOnly,
    /// `FastOnly` plus a streaming scan of on-chain `data` (no decryption).
    IncludeData,
    /// `IncludeData` plus decrypting matching encrypted blocks and scanning
    /// their off-chain files.
    ExhaustiveOffchain,
}

fn is_standalone_numeral(term: &str) -> bool {
    !term.is_empty() && term.chars().all(|c| c.is_ascii_digit())
}

fn is_short_uppercase_token(term: &str) -> bool {
    term.len() >= 2 && term.chars().all(|c| c.is_ascii_uppercase())
}

fn is_iso_date_like(term: &str) -> bool {
    term.len() >= 8 && term.chars().enumerate().all(|(i, c)| match i {
        4 | 7 => c == '-',
        _ => c.is_ascii_digit(),
    })
}

/// Validate a query term against the minimum-length rule and its
/// recognized-short-form exceptions.
pub fn validate_query_term(term: &str) -> Result<(), LedgerError> {
    if term.chars().count() >= 4 || is_standalone_numeral(term) || is_short_uppercase_token(term) || is_iso_date_like(term) {
        Ok(())
    } else {
        Err(LedgerError::InvalidArgument(format!(
            "query term '{term}' is shorter than the minimum length and matches no recognized short form"
        )))
    }
}

/// Validate and clamp `max_results` to the hard ceiling. `0` or negative is
/// rejected outright — there is no "unlimited" mode.
pub fn validate_max_results(max_results: usize, ceiling: usize) -> Result<usize, LedgerError> {
    if max_results == 0 {
        return Err(LedgerError::InvalidArgument("max_results must be greater than zero".into()));
    }
    Ok(max_results.min(ceiling))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_terms_need_four_chars() {
        assert!(validate_query_term("cat").is_err());
        assert!(validate_query_term("cats").is_ok());
    }

    #[test]
    fn short_forms_are_exempt() {
        assert!(validate_query_term("42").is_ok());
        assert!(validate_query_term("AB").is_ok());
        assert!(validate_query_term("2024-03-14").is_ok());
    }

    #[test]
    fn zero_max_results_rejected() {
        assert!(validate_max_results(0, 10_000).is_err());
    }

    #[test]
    fn max_results_clamped_to_ceiling() {
        assert_eq!(validate_max_results(50_000, 10_000).unwrap(), 10_000);
    }
}
