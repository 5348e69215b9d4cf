use object::{Object, ObjectSection};

use xdp_redirect_common::PROGRAM_LICENSE;

use crate::error::LicenseError;

const LICENSE_SECTION: &str = "license";

/// Checks the `license` section of an eBPF object before it is loaded.
pub fn validate_object_license(object: &[u8]) -> Result<(), LicenseError> {
    let file = object::File::parse(object).map_err(|e| LicenseError::Object(e.to_string()))?;
    let section = file
        .section_by_name(LICENSE_SECTION)
        .ok_or(LicenseError::Missing)?;
    let data = section
        .data()
        .map_err(|e| LicenseError::Object(e.to_string()))?;
    check_license(data)
}

/// Compares a raw, possibly NUL-terminated declaration with `PROGRAM_LICENSE`.
pub fn check_license(declared: &[u8]) -> Result<(), LicenseError> {
    let declared = declared.split(|b| *b == 0).next().unwrap_or_default();
    if declared.is_empty() {
        return Err(LicenseError::Missing);
    }
    if declared != expected() {
        return Err(LicenseError::Mismatch {
            found: String::from_utf8_lossy(declared).into_owned(),
            expected: expected_str(),
        });
    }
    Ok(())
}

fn expected() -> &'static [u8] {
    &PROGRAM_LICENSE[..PROGRAM_LICENSE.len() - 1]
}

fn expected_str() -> &'static str {
    std::str::from_utf8(expected()).unwrap_or("GPL")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_declared_license() {
        assert_eq!(check_license(b"GPL\0"), Ok(()));
        assert_eq!(check_license(b"GPL"), Ok(()));
    }

    #[test]
    fn rejects_missing_license() {
        assert_eq!(check_license(b""), Err(LicenseError::Missing));
        assert_eq!(check_license(b"\0\0\0\0"), Err(LicenseError::Missing));
    }

    #[test]
    fn rejects_other_license() {
        assert_eq!(
            check_license(b"Proprietary\0"),
            Err(LicenseError::Mismatch {
                found: "Proprietary".to_string(),
                expected: "GPL",
            })
        );
    }

    #[test]
    fn rejects_non_elf_object() {
        assert!(matches!(
            validate_object_license(b"not an elf object"),
            Err(LicenseError::Object(_))
        ));
    }
}
