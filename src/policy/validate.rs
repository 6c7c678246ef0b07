//! Shape checks run before any write is handed to the store.

use std::net::IpAddr;

use super::filter;
use crate::error::ValidationError;

const MAX_NAME_LEN: usize = 64;
const MAX_TEXT_LEN: usize = 1024;
/// bcrypt only reads the first 72 bytes of a password.
const MAX_PASSWORD_LEN: usize = 72;
const BCRYPT_PREFIXES: [&str; 3] = ["$2a$", "$2b$", "$2y$"];

/// Entity names end up as bare words in the daemon grammar.
pub fn name<'a>(field: &str, value: &'a str) -> Result<&'a str, ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::new(field, "cannot be empty"));
    }

    if value.len() > MAX_NAME_LEN {
        return Err(ValidationError::new(
            field,
            format!("must be {MAX_NAME_LEN} characters or less"),
        ));
    }

    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '@'))
    {
        return Err(ValidationError::new(
            field,
            "can only contain letters, digits, '.', '_', '-' and '@'",
        ));
    }

    Ok(value)
}

/// Device address: a single IP or an IP network in CIDR notation.
pub fn address(value: &str) -> Result<&str, ValidationError> {
    let value = value.trim();
    let (ip, prefix) = match value.split_once('/') {
        Some((ip, prefix)) => (ip, Some(prefix)),
        None => (value, None),
    };

    let ip: IpAddr = ip
        .parse()
        .map_err(|_| ValidationError::new("address", format!("'{value}' is not an IP address")))?;

    if let Some(prefix) = prefix {
        let max = if ip.is_ipv4() { 32 } else { 128 };
        match prefix.parse::<u8>() {
            Ok(p) if p <= max => {}
            _ => {
                return Err(ValidationError::new(
                    "address",
                    format!("prefix length must be between 0 and {max}"),
                ));
            }
        }
    }

    Ok(value)
}

/// Shared secrets are quoted on emission but must be printable.
pub fn secret<'a>(field: &str, value: &'a str) -> Result<&'a str, ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::new(field, "cannot be empty"));
    }
    if value.chars().any(char::is_control) {
        return Err(ValidationError::new(
            field,
            "cannot contain control characters",
        ));
    }
    free_text(field, value)
}

/// Descriptions and attribute values. Newlines and tabs are escaped on
/// emission; other control characters are rejected.
pub fn free_text<'a>(field: &str, value: &'a str) -> Result<&'a str, ValidationError> {
    if value.len() > MAX_TEXT_LEN {
        return Err(ValidationError::new(
            field,
            format!("must be {MAX_TEXT_LEN} bytes or less"),
        ));
    }
    if value
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
    {
        return Err(ValidationError::new(
            field,
            "contains a control character that cannot be escaped",
        ));
    }
    Ok(value)
}

/// Attribute and AV-pair keys, e.g. `shell:roles` or `timeout`.
pub fn key<'a>(field: &str, value: &'a str) -> Result<&'a str, ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::new(field, "cannot be empty"));
    }
    if value.len() > MAX_NAME_LEN
        || !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ':'))
    {
        return Err(ValidationError::new(
            field,
            "must be at most 64 letters, digits, '.', '_', '-' or ':'",
        ));
    }
    Ok(value)
}

pub fn service(value: &str) -> Result<&str, ValidationError> {
    let value = value.trim();
    if value.is_empty()
        || !value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(ValidationError::new(
            "service",
            "must be a lowercase word such as 'exec' or 'junos-exec'",
        ));
    }
    Ok(value)
}

/// Membership priority; lower values take precedence.
pub fn membership_priority(value: i32) -> Result<i32, ValidationError> {
    if value < 0 {
        return Err(ValidationError::new("priority", "must not be negative"));
    }
    Ok(value)
}

/// Command patterns must compile once normalized.
pub fn pattern(value: &str) -> Result<&str, ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("pattern", "cannot be empty"));
    }
    free_text("pattern", value)?;
    filter::compile_pattern(value)?;
    Ok(value)
}

pub fn password(value: &str) -> Result<&str, ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::new("password", "cannot be empty"));
    }
    if value.len() > MAX_PASSWORD_LEN {
        return Err(ValidationError::new(
            "password",
            format!("must be {MAX_PASSWORD_LEN} bytes or less"),
        ));
    }
    if value.contains('\0') {
        return Err(ValidationError::new("password", "cannot contain NUL"));
    }
    Ok(value)
}

/// Credentials are verified by the daemon through crypt(3), so only bcrypt
/// hashes (`$2a$`, `$2b$`, `$2y$`) are accepted.
pub fn crypt_hash(value: &str) -> Result<&str, ValidationError> {
    let invalid = || ValidationError::new("password_hash", "must be a bcrypt hash ($2b$NN$...)");

    let rest = BCRYPT_PREFIXES
        .iter()
        .find_map(|prefix| value.strip_prefix(prefix))
        .ok_or_else(invalid)?;
    let (cost, digest) = rest.split_once('$').ok_or_else(invalid)?;

    if cost.len() != 2 || !cost.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let cost: u32 = cost.parse().map_err(|_| invalid())?;
    if !(4..=31).contains(&cost)
        || digest.len() != 53
        || !digest
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '/'))
    {
        return Err(invalid());
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name() {
        assert_eq!(name("name", " netadmin ").unwrap(), "netadmin");
        assert!(name("name", "core-r1.lab").is_ok());
        assert!(name("name", "ops@corp").is_ok());
        assert_eq!(name("name", "").unwrap_err().field, "name");
        assert!(name("name", "has space").is_err());
        assert!(name("name", "brace{").is_err());
        assert!(name("name", &"a".repeat(65)).is_err());
    }

    #[test]
    fn test_address() {
        assert!(address("10.0.0.1").is_ok());
        assert!(address("10.0.0.0/8").is_ok());
        assert!(address("2001:db8::1").is_ok());
        assert!(address("2001:db8::/32").is_ok());
        assert!(address("10.0.0.0/33").is_err());
        assert!(address("router.example").is_err());
    }

    #[test]
    fn test_free_text() {
        assert!(free_text("description", "line one\nline \"two\" {x}").is_ok());
        assert!(free_text("description", "nul\0byte").is_err());
        assert!(free_text("description", "bell\u{7}").is_err());
    }

    #[test]
    fn test_secret() {
        assert!(secret("secret", "s3cr3t key").is_ok());
        assert!(secret("secret", "").is_err());
        assert!(secret("secret", "new\nline").is_err());
    }

    #[test]
    fn test_crypt_hash() {
        let hash = "$2b$12$R9h/cIPz0gi.URNNX3kh2OPST9/PgBkqquzi.Ss7KIUgO2t0jWMUW";
        assert_eq!(crypt_hash(hash).unwrap(), hash);
        assert!(crypt_hash(&hash.replace("$2b$", "$2y$")).is_ok());

        let argon = "$argon2id$v=19$m=8192,t=3,p=1$c2FsdA$aGFzaA";
        assert_eq!(crypt_hash(argon).unwrap_err().field, "password_hash");
        assert!(crypt_hash("$2b$03$R9h/cIPz0gi.URNNX3kh2OPST9/PgBkqquzi.Ss7KIUgO2t0jWMUW").is_err());
        assert!(crypt_hash("$2b$12$short").is_err());
        assert!(crypt_hash("cleartext").is_err());
    }

    #[test]
    fn test_password() {
        assert!(password("correct horse").is_ok());
        assert!(password("").is_err());
        assert!(password(&"x".repeat(73)).is_err());
        assert!(password("nul\0").is_err());
    }

    #[test]
    fn test_pattern() {
        assert!(pattern("show .*").is_ok());
        assert_eq!(pattern("show (").unwrap_err().field, "pattern");
        assert!(pattern("   ").is_err());
    }

    #[test]
    fn test_priority_and_service() {
        assert_eq!(membership_priority(10).unwrap(), 10);
        assert_eq!(membership_priority(-1).unwrap_err().field, "priority");
        assert!(service("exec").is_ok());
        assert!(service("Exec").is_err());
    }
}
