//! Identifier newtypes shared by the indices and their consumers.
//!
//! Every identifier the control plane hands out is an opaque string. Wrapping
//! each kind in its own type keeps an [`ApiId`] from being passed where a
//! [`SubscriptionId`] is expected, while [`Borrow<str>`] lets maps keyed by
//! these types be probed with a plain `&str` on the request path.

use std::borrow::Borrow;

/// Macro to define a newtype wrapper around `String` with standard trait
/// implementations.
///
/// Each generated type:
/// - Derives `Clone`, `Debug`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`, `Default`
/// - Derives `Serialize` and `Deserialize` (transparent)
/// - Implements `From<&str>` and `From<String>`
/// - Implements `AsRef<str>`, `Borrow<str>` and `Display`
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&String> for $name {
            fn from(value: &String) -> Self {
                Self(value.clone())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

define_id!(
    /// Identifier of a deployed API.
    ///
    /// # Examples
    ///
    /// ```
    /// use gateway_common_cache::ApiId;
    ///
    /// let api = ApiId::from("api-1");
    /// assert_eq!(api.as_str(), "api-1");
    /// assert_eq!(api.to_string(), "api-1");
    /// ```
    ApiId
);

define_id!(
    /// Identifier of a subscription.
    SubscriptionId
);

define_id!(
    /// Identifier of a plan exposed by an API.
    PlanId
);

define_id!(
    /// Identifier of the application owning a subscription or API key.
    ApplicationId
);
