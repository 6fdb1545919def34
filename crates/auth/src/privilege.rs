use std::borrow::Cow;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Privilege identifier: an atomic permitted operation on a protected resource.
///
/// Privileges are opaque upper-case strings (e.g. `"READ"`). The constants below
/// are the ones the engine itself refers to; resource modules may define more.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Privilege(Cow<'static, str>);

impl Privilege {
    pub const READ: Privilege = Privilege::from_static("READ");
    pub const READ_ABOUT: Privilege = Privilege::from_static("READ_ABOUT");
    pub const CREATE: Privilege = Privilege::from_static("CREATE");
    pub const UPDATE: Privilege = Privilege::from_static("UPDATE");
    pub const DELETE: Privilege = Privilege::from_static("DELETE");
    pub const GRANT: Privilege = Privilege::from_static("GRANT");
    pub const CONTRIBUTE: Privilege = Privilege::from_static("CONTRIBUTE");
    pub const PLATFORM_ADMIN: Privilege = Privilege::from_static("PLATFORM_ADMIN");
    pub const AUTHORIZATION_RESET: Privilege = Privilege::from_static("AUTHORIZATION_RESET");
    pub const READ_LICENSE: Privilege = Privilege::from_static("READ_LICENSE");
    pub const LICENSE_RESET: Privilege = Privilege::from_static("LICENSE_RESET");
    pub const ACCOUNT_LICENSE_MANAGE: Privilege = Privilege::from_static("ACCOUNT_LICENSE_MANAGE");

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_read(&self) -> bool {
        self.as_str() == Self::READ.as_str()
    }
}

impl core::fmt::Display for Privilege {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered set of privileges; ordering keeps logs and explanations stable.
pub type PrivilegeSet = BTreeSet<Privilege>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_compare_equal_to_owned_names() {
        assert_eq!(Privilege::READ, Privilege::new("READ".to_string()));
        assert!(Privilege::new("READ").is_read());
        assert!(!Privilege::UPDATE.is_read());
    }

    #[test]
    fn privileges_serialize_as_bare_strings() {
        let json = serde_json::to_string(&vec![Privilege::READ, Privilege::DELETE]).unwrap();
        assert_eq!(json, r#"["READ","DELETE"]"#);

        let parsed: Vec<Privilege> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, vec![Privilege::READ, Privilege::DELETE]);
    }
}
