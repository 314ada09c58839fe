/// Masks a credential for log output, keeping a short prefix for correlation.
pub fn mask_token(token: &str) -> String {
    let prefix: String = token.chars().take(6).collect();
    if prefix.chars().count() == token.chars().count() {
        return "***".to_string();
    }
    format!("{prefix}***")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token("eyJhbGciOiJIUzI1NiJ9.payload"), "eyJhbG***");
        assert_eq!(mask_token("short"), "***");
        assert_eq!(mask_token(""), "***");
    }
}
