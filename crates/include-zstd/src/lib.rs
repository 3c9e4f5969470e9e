use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use std::env;
use std::fs;
use std::path::PathBuf;
use syn::parse::{Parse, ParseStream};
use syn::{Error, LitByteStr, LitInt, LitStr, Token, parse_macro_input};

const DEFAULT_LEVEL: i32 = 19;

macro_rules! bail {
    ($call:expr) => {
        match $call {
            Ok(val) => val,
            Err(err) => return Error::new(Span::call_site(), err).to_compile_error().into(),
        }
    };
}

/// `"path/relative/to/manifest"` optionally followed by `, <level>`.
struct IncludeArgs {
    path: LitStr,
    level: i32,
}

impl Parse for IncludeArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let path: LitStr = input.parse()?;
        let level = if input.peek(Token![,]) {
            input.parse::<Token![,]>()?;
            if input.is_empty() {
                DEFAULT_LEVEL
            } else {
                input.parse::<LitInt>()?.base10_parse::<i32>()?
            }
        } else {
            DEFAULT_LEVEL
        };
        if !(1..=22).contains(&level) {
            return Err(Error::new(
                Span::call_site(),
                format!("zstd level must be between 1 and 22, got {level}"),
            ));
        }
        Ok(Self { path, level })
    }
}

/// Embed a file as a zstd-compressed byte string literal.
///
/// The returned `&'static [u8]` must be decoded with `zstd::decode_all` at runtime.
#[proc_macro]
pub fn include_zstd(input: TokenStream) -> TokenStream {
    let IncludeArgs { path, level } = parse_macro_input!(input as IncludeArgs);

    let manifest_dir = bail!(env::var("CARGO_MANIFEST_DIR"));
    let full_path = PathBuf::from(manifest_dir).join(path.value());

    let content = bail!(fs::read(&full_path));
    if content.is_empty() {
        return Error::new(
            path.span(),
            format!("refusing to embed empty file {}", full_path.display()),
        )
        .to_compile_error()
        .into();
    }

    let compressed_data = bail!(zstd::stream::encode_all(&content[..], level));

    let literal_bytes = LitByteStr::new(&compressed_data, Span::call_site());

    let output = quote!(#literal_bytes);

    output.into()
}
