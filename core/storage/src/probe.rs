//! Typed probes over provider-native values.
//!
//! A probe wraps an optional type-erased value handed out by a driver. Callers
//! name the concrete provider type they expect; a probe either hands back a
//! reference of that type or `None`. A miss is a "not supported" signal, not
//! an error, and never changes the value behind the probe.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Shared provider-native value, as kept by attribute snapshots and readers.
pub type Native = Arc<dyn Any + Send + Sync>;

/// Read-only view of a provider-native value.
#[derive(Clone, Copy)]
pub struct Probe<'a> {
    value: Option<&'a (dyn Any + Send + Sync)>,
}

impl<'a> Probe<'a> {
    pub fn new(value: &'a (dyn Any + Send + Sync)) -> Self {
        Self { value: Some(value) }
    }

    /// A probe that matches no type.
    pub fn empty() -> Self {
        Self { value: None }
    }

    pub fn from_option(value: Option<&'a (dyn Any + Send + Sync)>) -> Self {
        Self { value }
    }

    /// Downcast to `T`.
    pub fn get<T: Any>(&self) -> Option<&'a T> {
        self.value?.downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.get::<T>().is_some()
    }
}

impl fmt::Debug for Probe<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Probe")
            .field("present", &self.value.is_some())
            .finish()
    }
}

/// Mutable view of a provider-native request, handed to writer hooks.
pub struct ProbeMut<'a> {
    value: Option<&'a mut (dyn Any + Send)>,
}

impl<'a> ProbeMut<'a> {
    pub fn new(value: &'a mut (dyn Any + Send)) -> Self {
        Self { value: Some(value) }
    }

    /// A probe that matches no type.
    pub fn empty() -> Self {
        Self { value: None }
    }

    /// Downcast to `T` for mutation.
    pub fn get_mut<T: Any>(&mut self) -> Option<&mut T> {
        match &mut self.value {
            Some(value) => value.downcast_mut::<T>(),
            None => None,
        }
    }

    pub fn is<T: Any>(&self) -> bool {
        match &self.value {
            Some(value) => value.is::<T>(),
            None => false,
        }
    }
}

impl fmt::Debug for ProbeMut<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeMut")
            .field("present", &self.value.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Request {
        language: Option<String>,
    }

    #[test]
    fn test_probe_match_and_miss() {
        let value = String::from("client");
        let probe = Probe::new(&value);

        assert_eq!(probe.get::<String>().map(String::as_str), Some("client"));
        assert!(probe.get::<u32>().is_none());
        assert!(!probe.is::<Request>());
    }

    #[test]
    fn test_empty_probe_never_matches() {
        assert!(Probe::empty().get::<String>().is_none());
        let mut probe = ProbeMut::empty();
        assert!(probe.get_mut::<String>().is_none());
        assert!(!probe.is::<String>());
    }

    #[test]
    fn test_probe_mut_mutates_in_place() {
        let mut req = Request { language: None };
        {
            let mut probe = ProbeMut::new(&mut req);
            probe.get_mut::<Request>().unwrap().language = Some("nl".to_string());
        }
        assert_eq!(req.language.as_deref(), Some("nl"));
    }

    #[test]
    fn test_probe_mut_miss_leaves_value_alone() {
        let mut req = Request { language: Some("en".to_string()) };
        let mut probe = ProbeMut::new(&mut req);
        assert!(probe.get_mut::<String>().is_none());
        drop(probe);
        assert_eq!(req, Request { language: Some("en".to_string()) });
    }
}
