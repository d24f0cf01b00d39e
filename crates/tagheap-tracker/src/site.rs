//! Call-site provenance.

/// Where an allocation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallSite<'a> {
    pub file: &'a str,
    pub function: &'a str,
    pub line: u32,
}

impl<'a> CallSite<'a> {
    #[must_use]
    pub const fn new(file: &'a str, function: &'a str, line: u32) -> Self {
        Self {
            file,
            function,
            line,
        }
    }

    /// Placeholder for callers with no provenance to offer.
    #[must_use]
    pub const fn unknown() -> CallSite<'static> {
        CallSite {
            file: "<unknown>",
            function: "<unknown>",
            line: 0,
        }
    }
}

/// Path of the enclosing function, derived from a nested item's type name.
/// Closure segments are dropped so the named function is what remains.
#[doc(hidden)]
#[must_use]
pub fn enclosing_function(marker_path: &'static str) -> &'static str {
    let mut path = marker_path
        .strip_suffix("::__marker")
        .unwrap_or(marker_path);
    while let Some(outer) = path.strip_suffix("::{{closure}}") {
        path = outer;
    }
    path
}

/// Captures the current file, line and enclosing function as a
/// [`CallSite`].
#[macro_export]
macro_rules! call_site {
    () => {{
        fn __marker() {}
        fn __type_name_of<T>(_: T) -> &'static str {
            ::std::any::type_name::<T>()
        }
        $crate::CallSite::new(
            file!(),
            $crate::site::enclosing_function(__type_name_of(__marker)),
            line!(),
        )
    }};
}
