//! Capability traits describing what an input to a domain operation provides.
//!
//! Every trait carries a single accessor. Operations bound their arguments by the
//! capabilities they need, so a bare `&str` works anywhere a richer entity does.

use std::fmt;

/// Something mounted at a path: an engine, an auth method or a CA.
pub trait MountPathEntity {
    fn mount_path(&self) -> &str;
}

/// A secret path inside a KV engine.
pub trait SecretPathEntity {
    fn secret_path(&self) -> &str;
}

pub trait RoleNameEntity {
    fn role_name(&self) -> &str;
}

pub trait PolicyNameEntity {
    fn policy_name(&self) -> &str;
}

/// A named key inside a transit engine.
pub trait KeyNameEntity {
    fn key_name(&self) -> &str;
}

/// A certificate serial number.
pub trait SerialNumberEntity {
    fn serial_number(&self) -> &str;
}

macro_rules! string_entity {
    ($trait:ident, $method:ident, $newtype:ident) => {
        impl $trait for str {
            fn $method(&self) -> &str {
                self
            }
        }

        impl $trait for String {
            fn $method(&self) -> &str {
                self
            }
        }

        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $newtype(pub String);

        impl $newtype {
            pub fn new(value: impl Into<String>) -> Self {
                $newtype(value.into())
            }
        }

        impl $trait for $newtype {
            fn $method(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $newtype {
            fn from(value: &str) -> Self {
                $newtype(value.to_string())
            }
        }

        impl From<String> for $newtype {
            fn from(value: String) -> Self {
                $newtype(value)
            }
        }

        impl fmt::Display for $newtype {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_entity!(MountPathEntity, mount_path, MountPath);
string_entity!(SecretPathEntity, secret_path, SecretPath);
string_entity!(RoleNameEntity, role_name, RoleName);
string_entity!(PolicyNameEntity, policy_name, PolicyName);
string_entity!(KeyNameEntity, key_name, KeyName);
string_entity!(SerialNumberEntity, serial_number, SerialNumber);

#[cfg(test)]
mod tests {
    use super::*;

    fn path_of(entity: &(impl MountPathEntity + ?Sized)) -> String {
        entity.mount_path().to_string()
    }

    #[test]
    fn test_strings_and_newtypes_expose_capabilities() {
        assert_eq!(path_of("managed/kv"), "managed/kv");
        assert_eq!(path_of(&"managed/kv".to_string()), "managed/kv");
        assert_eq!(path_of(&MountPath::new("managed/pki")), "managed/pki");
        assert_eq!(KeyName::from("signing").key_name(), "signing");
        assert_eq!(SerialNumber::from("aa:bb").to_string(), "aa:bb");
    }
}
