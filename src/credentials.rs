/// Supplies user-provided fallback API keys forwarded to the proxy.
///
/// The core only ever sees keys through this trait; where they come from
/// (config file, environment, a settings store) is the caller's business.
pub trait CredentialSource: Send + Sync {
    fn fallback_keys(&self) -> Vec<String>;
}

/// A fixed key list, trimmed and de-duplicated in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticKeys {
    keys: Vec<String>,
}

impl StaticKeys {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<String> = Vec::new();
        for k in keys {
            let k = k.as_ref().trim();
            if !k.is_empty() && !out.iter().any(|x| x == k) {
                out.push(k.to_string());
            }
        }
        Self { keys: out }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl CredentialSource for StaticKeys {
    fn fallback_keys(&self) -> Vec<String> {
        self.keys.clone()
    }
}
