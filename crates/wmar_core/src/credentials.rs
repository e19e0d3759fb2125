use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialsError {
    #[error("SSN must have 9 digits (found {found})")]
    SsnDigits { found: usize },
}

/// Canonicalize an SSN as `DDD-DD-DDDD`, ignoring any non-digit characters.
pub fn format_ssn(raw: &str) -> Result<String, CredentialsError> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() != 9 {
        return Err(CredentialsError::SsnDigits {
            found: digits.len(),
        });
    }
    Ok(format!("{}-{}-{}", &digits[..3], &digits[3..5], &digits[5..]))
}

/// Shared secrets for the identity form. Built once per run.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    ssn: String,
    date_of_birth: String,
    zip: String,
}

impl Credentials {
    pub fn new(ssn: &str, date_of_birth: &str, zip: &str) -> Result<Self, CredentialsError> {
        Ok(Self {
            ssn: format_ssn(ssn)?,
            date_of_birth: date_of_birth.trim().to_string(),
            zip: zip.trim().to_string(),
        })
    }

    pub fn ssn(&self) -> &str {
        &self.ssn
    }

    pub fn date_of_birth(&self) -> &str {
        &self.date_of_birth
    }

    pub fn zip(&self) -> &str {
        &self.zip
    }
}

// Secrets must never reach the log.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ssn", &"***-**-****")
            .field("date_of_birth", &"**/**/****")
            .field("zip", &"*****")
            .finish()
    }
}
