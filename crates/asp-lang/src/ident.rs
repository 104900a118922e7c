use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};

use string_interner::{DefaultBackend, DefaultSymbol, StringInterner};

type Interner = StringInterner<DefaultBackend>;

static NAMES: LazyLock<Mutex<Interner>> = LazyLock::new(|| Mutex::new(Interner::default()));

fn names() -> MutexGuard<'static, Interner> {
    NAMES.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A case-insensitive guest-language name.
///
/// Names are folded to lowercase before interning, so `Foo`, `FOO` and `foo`
/// are the same identifier and compare as a single integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ident(DefaultSymbol);

impl Ident {
    pub fn new(name: &str) -> Self {
        if name.chars().any(char::is_uppercase) {
            Self(names().get_or_intern(name.to_lowercase()))
        } else {
            Self(names().get_or_intern(name))
        }
    }

    /// The folded name.
    pub fn as_str(&self) -> String {
        self.resolve_with(str::to_owned)
    }

    pub fn resolve_with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&str) -> R,
    {
        let names = names();
        f(names.resolve(self.0).unwrap_or_default())
    }

    pub fn is_empty(&self) -> bool {
        self.resolve_with(str::is_empty)
    }
}

impl Default for Ident {
    fn default() -> Self {
        Ident::new("")
    }
}

impl From<&str> for Ident {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Ident {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

impl std::fmt::Display for Ident {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.resolve_with(|name| f.write_str(name))
    }
}

#[cfg(feature = "ast-json")]
impl serde::Serialize for Ident {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.resolve_with(|name| serializer.serialize_str(name))
    }
}

#[cfg(feature = "ast-json")]
impl<'de> serde::Deserialize<'de> for Ident {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        String::deserialize(deserializer).map(|name| Ident::new(&name))
    }
}
