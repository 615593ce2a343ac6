//! Curated name→version table: pre-vetted exact pins consulted before any
//! other resolution step. Entries cover the package groups the generator
//! scaffolds most often; anything else falls through the ladder.

use once_cell::sync::Lazy;
use std::collections::BTreeMap;

static CURATED: Lazy<BTreeMap<&'static str, &'static str>> = Lazy::new(|| {
    BTreeMap::from([
        // React stack
        ("react", "18.2.0"),
        ("react-dom", "18.2.0"),
        ("react-router-dom", "6.22.3"),
        // Vue stack
        ("vue", "3.4.21"),
        ("vue-router", "4.3.0"),
        ("pinia", "2.1.7"),
        // Build tooling
        ("typescript", "5.4.5"),
        ("vite", "5.2.8"),
        ("@vitejs/plugin-react", "4.2.1"),
        ("@vitejs/plugin-vue", "5.0.4"),
        // Styling
        ("tailwindcss", "3.4.3"),
        ("postcss", "8.4.38"),
        ("autoprefixer", "10.4.19"),
        ("sass", "1.74.1"),
        // Data / utilities
        ("axios", "1.6.8"),
        ("zod", "3.22.4"),
        ("date-fns", "3.6.0"),
        ("clsx", "2.1.0"),
        // Headless CMS clients
        ("storyblok-js-client", "6.7.1"),
        ("@storyblok/js", "3.0.8"),
        ("@storyblok/react", "3.0.10"),
        ("@storyblok/vue", "8.0.8"),
        // Test tooling
        ("vitest", "1.4.0"),
        ("@testing-library/react", "14.2.2"),
        // Lint/format
        ("eslint", "8.57.0"),
        ("prettier", "3.2.5"),
    ])
});

/// Exact pre-vetted pin for `name`, if the table carries it.
pub fn lookup(name: &str) -> Option<&'static str> {
    CURATED.get(name).copied()
}
