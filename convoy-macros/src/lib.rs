use proc_macro::TokenStream;
use syn::parse_macro_input;

mod embed_macro;

use embed_macro::EmbedInvocation;

/// Embed every migration file in a directory into the binary.
///
/// The directory is resolved relative to the invoking crate's
/// `CARGO_MANIFEST_DIR`. Files are filtered by extension (default `lua`),
/// hidden files are skipped, and the result is sorted by file name so the
/// sequence matches what `FileSource` would load at runtime.
///
/// Cargo only tracks the files that existed when the macro expanded, so
/// adding a migration does not trigger a rebuild by itself. Crates using the
/// macro need a `build.rs` that watches the directory:
///
/// ```text
/// fn main() {
///     println!("cargo:rerun-if-changed=migrations");
/// }
/// ```
///
/// # Example
///
/// ```text
/// static MIGRATIONS: &[convoy::EmbeddedMigration] = convoy::embed_migrations!("migrations");
/// static SQL: &[convoy::EmbeddedMigration] = convoy::embed_migrations!("sql", "sql");
/// ```
#[proc_macro]
pub fn embed_migrations(input: TokenStream) -> TokenStream {
    match parse_macro_input!(input as EmbedInvocation).emit() {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}
