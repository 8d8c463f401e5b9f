//! Key normalization and compound key formation.
//!
//! Keys arrive at the API boundary as strings, numbers or lists of either.
//! They are normalized once into canonical strings so the trigger engine
//! only ever deals with `String`.

use crate::error::{Result, StoreError};

/// Reserved key meaning "any change, regardless of key".
pub const KEY_ALL: &str = "%!$all";

/// Separator used when joining sub-keys into a compound key.
pub const KEY_SEPARATOR: &str = "%&";

/// A key as accepted by subscribe and trigger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Key {
    Str(String),
    /// Wide enough to hold every primitive integer key without loss.
    Num(i128),
    Many(Vec<Key>),
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Str(s)
    }
}

impl From<&String> for Key {
    fn from(s: &String) -> Self {
        Key::Str(s.clone())
    }
}

macro_rules! impl_numeric_key {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Key {
                fn from(n: $t) -> Self {
                    Key::Num(i128::from(n))
                }
            }
        )*
    };
}

impl_numeric_key!(i8, i16, i32, i64, u8, u16, u32, u64);

impl From<usize> for Key {
    fn from(n: usize) -> Self {
        Key::Num(n as i128)
    }
}

impl From<isize> for Key {
    fn from(n: isize) -> Self {
        Key::Num(n as i128)
    }
}

impl<T: Into<Key>> From<Vec<T>> for Key {
    fn from(keys: Vec<T>) -> Self {
        Key::Many(keys.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Key>, const N: usize> From<[T; N]> for Key {
    fn from(keys: [T; N]) -> Self {
        Key::Many(keys.into_iter().map(Into::into).collect())
    }
}

fn scalar_to_string(key: Key) -> Result<String> {
    match key {
        Key::Str(s) if s.is_empty() => Err(StoreError::InvalidKey("empty key".to_string())),
        Key::Str(s) => Ok(s),
        Key::Num(n) => Ok(n.to_string()),
        Key::Many(_) => Err(StoreError::InvalidKey(
            "a list of keys is not a single key".to_string(),
        )),
    }
}

/// Normalize a single key into its canonical string form.
pub fn normalize_key(key: Key) -> Result<String> {
    scalar_to_string(key)
}

/// Flatten a key or nested list of keys into canonical strings.
///
/// Uses an explicit work stack so deeply nested or very large lists cannot
/// overflow the call stack.
pub fn normalize_keys(key: Key) -> Result<Vec<String>> {
    let mut out = Vec::new();
    let mut stack = vec![key];
    while let Some(next) = stack.pop() {
        match next {
            Key::Many(list) => stack.extend(list.into_iter().rev()),
            scalar => out.push(scalar_to_string(scalar)?),
        }
    }
    Ok(out)
}

/// Join sub-keys, in order, into one compound key.
pub fn form_compound_key<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut compound = String::new();
    for (i, part) in parts.into_iter().enumerate() {
        if i > 0 {
            compound.push_str(KEY_SEPARATOR);
        }
        compound.push_str(part.as_ref());
    }
    compound
}
