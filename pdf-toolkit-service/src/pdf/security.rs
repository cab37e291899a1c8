//! Password protection and permissions through qpdf.
//!
//! Encrypted output is always AES-256 (revision 6).

use std::collections::BTreeMap;
use std::path::Path;

use qpdf::{
    EncryptionParams, EncryptionParamsR6, PrintPermission, QPdf, QPdfErrorCode, QPdfObjectLike,
};
use rand::Rng;
use serde_json::json;
use tracing::{info, instrument};

use crate::error::{ProcessingError, ServiceError, ServiceResult};
use crate::operation::OperationResult;

/// Permission keys accepted by `set_permissions`
pub const PERMISSION_KEYS: [&str; 7] = [
    "print",
    "modify",
    "copy",
    "annotate",
    "fill_forms",
    "extract_accessibility",
    "assemble",
];

/// Requested document permissions; absent keys are allowed
#[derive(Debug, Clone, PartialEq)]
pub struct Permissions {
    pub print: bool,
    pub modify: bool,
    pub copy: bool,
    pub annotate: bool,
    pub fill_forms: bool,
    pub extract_accessibility: bool,
    pub assemble: bool,
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            print: true,
            modify: true,
            copy: true,
            annotate: true,
            fill_forms: true,
            extract_accessibility: true,
            assemble: true,
        }
    }
}

impl Permissions {
    /// Build from a key/flag map, rejecting unknown keys
    pub fn from_map(map: &BTreeMap<String, bool>) -> ServiceResult<Self> {
        let mut permissions = Self::default();
        for (key, &allowed) in map {
            match key.as_str() {
                "print" => permissions.print = allowed,
                "modify" => permissions.modify = allowed,
                "copy" => permissions.copy = allowed,
                "annotate" => permissions.annotate = allowed,
                "fill_forms" => permissions.fill_forms = allowed,
                "extract_accessibility" => permissions.extract_accessibility = allowed,
                "assemble" => permissions.assemble = allowed,
                other => {
                    return Err(ServiceError::invalid(format!(
                        "Unknown permission '{}'; expected one of {}",
                        other,
                        PERMISSION_KEYS.join(", ")
                    )));
                }
            }
        }
        Ok(permissions)
    }

    /// Decode the `/P` bit field
    pub fn from_p_value(p: i64) -> Self {
        let bit = |n: u32| (p >> (n - 1)) & 1 == 1;
        Self {
            print: bit(3),
            modify: bit(4),
            copy: bit(5),
            annotate: bit(6),
            fill_forms: bit(9),
            extract_accessibility: bit(10),
            assemble: bit(11),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "print": self.print,
            "modify": self.modify,
            "copy": self.copy,
            "annotate": self.annotate,
            "fill_forms": self.fill_forms,
            "extract_accessibility": self.extract_accessibility,
            "assemble": self.assemble,
        })
    }

    fn encryption_params(&self, user_password: &str, owner_password: &str) -> EncryptionParams {
        EncryptionParams::R6(EncryptionParamsR6 {
            user_password: user_password.to_string(),
            owner_password: owner_password.to_string(),
            allow_accessibility: self.extract_accessibility,
            allow_extract: self.copy,
            allow_assemble: self.assemble,
            allow_annotate_and_form: self.annotate,
            allow_form_filling: self.fill_forms,
            allow_modify_other: self.modify,
            allow_print: if self.print {
                PrintPermission::Full
            } else {
                PrintPermission::None
            },
            encrypt_metadata: true,
        })
    }
}

pub(crate) fn qpdf_error(e: qpdf::QPdfError) -> ServiceError {
    if matches!(e.error_code(), QPdfErrorCode::InvalidPassword) {
        ProcessingError::InvalidPassword.into()
    } else {
        ProcessingError::pdf(e).into()
    }
}

/// Open with qpdf; `None` means no password
pub(crate) fn open(path: &Path, password: Option<&str>) -> ServiceResult<QPdf> {
    match password {
        Some(password) => QPdf::read_encrypted(path, password),
        None => QPdf::read(path),
    }
    .map_err(qpdf_error)
}

/// Whether the file carries an encryption dictionary
pub fn is_encrypted(path: &Path) -> ServiceResult<bool> {
    match QPdf::read(path) {
        Ok(pdf) => Ok(pdf.is_encrypted()),
        Err(e) if matches!(e.error_code(), QPdfErrorCode::InvalidPassword) => Ok(true),
        Err(e) => Err(qpdf_error(e)),
    }
}

fn generate_password() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789";
    let mut rng = rand::thread_rng();
    (0..20)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

#[instrument(skip_all, fields(input = %input.display()))]
pub fn add_password(
    input: &Path,
    output: &Path,
    user_password: &str,
    owner_password: Option<&str>,
    permissions: Option<&Permissions>,
) -> ServiceResult<OperationResult> {
    if user_password.is_empty() {
        return Err(ServiceError::invalid("User password cannot be empty"));
    }
    if is_encrypted(input)? {
        return Err(ProcessingError::Encrypted.into());
    }

    let owner_password = owner_password
        .filter(|p| !p.is_empty())
        .unwrap_or(user_password);
    let permissions = permissions.cloned().unwrap_or_default();

    let pdf = open(input, None)?;
    pdf.writer()
        .preserve_encryption(false)
        .encryption_params(permissions.encryption_params(user_password, owner_password))
        .write(output)
        .map_err(qpdf_error)?;

    info!(output = %output.display(), "Encrypted PDF");
    Ok(OperationResult::ok("Password protection added")
        .with_output(output)
        .with_data(json!({
            "encryption": "AES-256",
            "permissions": permissions.to_json(),
        })))
}

#[instrument(skip_all, fields(input = %input.display()))]
pub fn remove_password(input: &Path, output: &Path, password: &str) -> ServiceResult<OperationResult> {
    if !is_encrypted(input)? {
        std::fs::copy(input, output).map_err(ProcessingError::Io)?;
        return Ok(OperationResult::ok("Document was not encrypted")
            .with_output(output)
            .with_warning("Input is not password protected; copied unchanged"));
    }

    let pdf = open(input, Some(password))?;
    pdf.writer()
        .preserve_encryption(false)
        .write(output)
        .map_err(qpdf_error)?;

    info!(output = %output.display(), "Removed PDF password");
    Ok(OperationResult::ok("Password removed").with_output(output))
}

/// Owner-password-only encryption carrying the requested permissions
#[instrument(skip_all, fields(input = %input.display()))]
pub fn set_permissions(
    input: &Path,
    output: &Path,
    permissions: &Permissions,
    owner_password: Option<&str>,
) -> ServiceResult<OperationResult> {
    if is_encrypted(input)? {
        return Err(ProcessingError::Encrypted.into());
    }

    let (owner_password, generated) = match owner_password.filter(|p| !p.is_empty()) {
        Some(p) => (p.to_string(), false),
        None => (generate_password(), true),
    };

    let pdf = open(input, None)?;
    pdf.writer()
        .preserve_encryption(false)
        .encryption_params(permissions.encryption_params("", &owner_password))
        .write(output)
        .map_err(qpdf_error)?;

    let mut data = json!({ "permissions": permissions.to_json() });
    if generated {
        data["owner_password"] = json!(owner_password);
    }

    let mut result = OperationResult::ok("Permissions applied")
        .with_output(output)
        .with_data(data);
    if generated {
        result = result.with_warning("Owner password was generated; store it to change permissions later");
    }
    Ok(result)
}

/// Encryption status, filter/revision and permission flags
#[instrument(skip_all, fields(input = %input.display()))]
pub fn security_info(input: &Path, password: Option<&str>) -> ServiceResult<serde_json::Value> {
    let pdf = match open(input, password) {
        Ok(pdf) => pdf,
        Err(ServiceError::Processing(ProcessingError::InvalidPassword)) => {
            return Ok(json!({
                "encrypted": true,
                "requires_password": true,
            }));
        }
        Err(e) => return Err(e),
    };

    if !pdf.is_encrypted() {
        return Ok(json!({
            "encrypted": false,
            "requires_password": false,
            "permissions": Permissions::default().to_json(),
        }));
    }

    let mut info = json!({
        "encrypted": true,
        "requires_password": false,
    });
    if let Some(encrypt) = pdf
        .get_trailer()
        .and_then(|t| t.get("/Encrypt"))
        .map(qpdf::QPdfDictionary::from)
    {
        if let Some(filter) = encrypt.get("/Filter") {
            info["filter"] = json!(filter.as_name().trim_start_matches('/'));
        }
        if let Some(v) = encrypt.get("/V") {
            info["version"] = json!(qpdf::QPdfScalar::from(v).as_i64());
        }
        if let Some(r) = encrypt.get("/R") {
            info["revision"] = json!(qpdf::QPdfScalar::from(r).as_i64());
        }
        if let Some(p) = encrypt.get("/P") {
            info["permissions"] = Permissions::from_p_value(qpdf::QPdfScalar::from(p).as_i64()).to_json();
        }
    }
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::testing::sample_pdf;

    #[test]
    fn test_permissions_from_map_rejects_unknown_keys() {
        let mut map = BTreeMap::new();
        map.insert("print".to_string(), false);
        let permissions = Permissions::from_map(&map).unwrap();
        assert!(!permissions.print);
        assert!(permissions.copy);

        map.insert("teleport".to_string(), true);
        assert!(matches!(
            Permissions::from_map(&map),
            Err(ServiceError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn test_permissions_from_p_value() {
        // print and copy only (bits 3 and 5) plus the reserved high bits
        let p = -4096 | 4 | 16;
        let permissions = Permissions::from_p_value(p);
        assert!(permissions.print);
        assert!(permissions.copy);
        assert!(!permissions.modify);
        assert!(!permissions.assemble);
    }

    #[test]
    fn test_password_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let input = sample_pdf(dir.path(), "doc.pdf", 1);
        let locked = dir.path().join("locked.pdf");
        let unlocked = dir.path().join("unlocked.pdf");

        add_password(&input, &locked, "secret", None, None).unwrap();
        assert!(is_encrypted(&locked).unwrap());

        assert!(matches!(
            remove_password(&locked, &unlocked, "wrong"),
            Err(ServiceError::Processing(ProcessingError::InvalidPassword))
        ));
        remove_password(&locked, &unlocked, "secret").unwrap();
        assert!(!is_encrypted(&unlocked).unwrap());
        assert_eq!(crate::pdf::page_count(&unlocked).unwrap(), 1);
    }

    #[test]
    fn test_remove_password_from_plain_file_warns() {
        let dir = tempfile::tempdir().unwrap();
        let input = sample_pdf(dir.path(), "doc.pdf", 1);
        let output = dir.path().join("copy.pdf");

        let result = remove_password(&input, &output, "anything").unwrap();
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(std::fs::read(&input).unwrap(), std::fs::read(&output).unwrap());
    }

    #[test]
    fn test_set_permissions_generates_owner_password() {
        let dir = tempfile::tempdir().unwrap();
        let input = sample_pdf(dir.path(), "doc.pdf", 1);
        let output = dir.path().join("restricted.pdf");
        let permissions = Permissions {
            print: false,
            ..Permissions::default()
        };

        let result = set_permissions(&input, &output, &permissions, None).unwrap();
        let data = result.data.unwrap();
        assert_eq!(data["owner_password"].as_str().unwrap().len(), 20);

        let info = security_info(&output, None).unwrap();
        assert_eq!(info["encrypted"], true);
        assert_eq!(info["requires_password"], false);
    }
}
