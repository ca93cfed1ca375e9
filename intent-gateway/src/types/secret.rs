use std::fmt::{self, Debug, Display, Formatter};

/// Wrapper for values that must never appear in logs or serialized output.
///
/// The [`Debug`], [`Display`], and [`serde::Serialize`] implementations all
/// emit a fixed placeholder instead of the inner value. Read access goes
/// through [`Secret::expose`] so call sites are easy to audit.
#[derive(Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize)]
pub struct Secret<T>(T);

impl<T> Secret<T> {
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl<T> From<T> for Secret<T> {
    fn from(value: T) -> Self {
        Self(value)
    }
}

impl<T> serde::Serialize for Secret<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str("*****")
    }
}

impl<T> Debug for Secret<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("*****")
    }
}

impl<T> Display for Secret<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("*****")
    }
}
