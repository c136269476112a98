use std::path::{Path, PathBuf};

use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::{Error, LitStr, Result, Token};

const DEFAULT_EXTENSION: &str = "lua";

pub struct EmbedInvocation {
    dir: LitStr,
    extension: Option<LitStr>,
}

impl Parse for EmbedInvocation {
    fn parse(input: ParseStream) -> Result<Self> {
        let dir: LitStr = input.parse()?;
        let mut extension = None;
        if input.peek(Token![,]) {
            input.parse::<Token![,]>()?;
            if !input.is_empty() {
                extension = Some(input.parse()?);
                if input.peek(Token![,]) {
                    input.parse::<Token![,]>()?;
                }
            }
        }
        if !input.is_empty() {
            return Err(input.error("expected `embed_migrations!(\"dir\")` or `embed_migrations!(\"dir\", \"ext\")`"));
        }
        Ok(Self { dir, extension })
    }
}

impl EmbedInvocation {
    pub fn emit(&self) -> Result<TokenStream2> {
        let extension = self
            .extension
            .as_ref()
            .map(|lit| lit.value())
            .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
        let extension = extension.trim_start_matches('.').to_string();
        if extension.is_empty() {
            let span = self.extension.as_ref().map(|lit| lit.span()).unwrap_or_else(|| self.dir.span());
            return Err(Error::new(span, "migration extension must not be empty"));
        }

        let dir = self.resolve_dir()?;
        let files = collect_files(&dir, &extension).map_err(|err| {
            Error::new(
                self.dir.span(),
                format!("failed to read migrations from {}: {err}", dir.display()),
            )
        })?;

        let entries = files.iter().map(|(id, path)| {
            let path = path.to_string_lossy().into_owned();
            quote! {
                ::convoy::source::EmbeddedMigration::new(#id, include_str!(#path))
            }
        });

        Ok(quote! {
            {
                const MIGRATIONS: &[::convoy::source::EmbeddedMigration] = &[#(#entries),*];
                MIGRATIONS
            }
        })
    }

    fn resolve_dir(&self) -> Result<PathBuf> {
        let relative = PathBuf::from(self.dir.value());
        let dir = if relative.is_absolute() {
            relative
        } else {
            let manifest_dir = std::env::var("CARGO_MANIFEST_DIR")
                .map_err(|_| Error::new(self.dir.span(), "CARGO_MANIFEST_DIR is not set"))?;
            Path::new(&manifest_dir).join(relative)
        };

        if !dir.is_dir() {
            return Err(Error::new(
                self.dir.span(),
                format!("migrations directory {} does not exist", dir.display()),
            ));
        }
        Ok(dir)
    }
}

/// Matching files as (file name, absolute path), sorted by file name.
fn collect_files(dir: &Path, extension: &str) -> std::io::Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|ext| ext.to_str()) != Some(extension) {
            continue;
        }
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        files.push((name.to_string(), path.canonicalize()?));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}
