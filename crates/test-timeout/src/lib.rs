//! `#[tokio_timeout_test]`: an async tokio test that fails instead of hanging.
//!
//! ```ignore
//! #[test_timeout::tokio_timeout_test(10)]
//! async fn server_answers() { /* ... */ }
//! ```
//!
//! The argument is the timeout in seconds (default 30). The test runs on a
//! two-worker multi-thread runtime so spawned server tasks make progress.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Attribute, ItemFn, LitInt};

const DEFAULT_SECS: u64 = 30;

#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let secs = if attr.is_empty() {
        DEFAULT_SECS
    } else {
        let lit = parse_macro_input!(attr as LitInt);
        match parse_secs(&lit) {
            Ok(secs) => secs,
            Err(err) => return err.to_compile_error().into(),
        }
    };

    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(&sig.fn_token, "tokio_timeout_test needs an async fn")
            .to_compile_error()
            .into();
    }
    sig.asyncness = None;
    let name = sig.ident.to_string();

    let attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_test_attribute(attr))
        .collect();

    TokenStream::from(quote! {
        #[::core::prelude::v1::test]
        #(#attrs)*
        #vis #sig {
            ::tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .expect("failed to build tokio runtime")
                .block_on(async move {
                    match ::tokio::time::timeout(
                        ::std::time::Duration::from_secs(#secs),
                        async move #block,
                    )
                    .await
                    {
                        Ok(output) => output,
                        Err(_) => panic!("{} timed out after {}s", #name, #secs),
                    }
                })
        }
    })
}

fn parse_secs(lit: &LitInt) -> syn::Result<u64> {
    let secs: u64 = lit.base10_parse()?;
    if secs == 0 {
        return Err(syn::Error::new_spanned(lit, "timeout must be at least one second"));
    }
    Ok(secs)
}

/// `#[test]` and `#[tokio::test(..)]` would run the body a second way.
fn is_test_attribute(attr: &Attribute) -> bool {
    let segments: Vec<String> = attr
        .path()
        .segments
        .iter()
        .map(|segment| segment.ident.to_string())
        .collect();
    matches!(
        segments.iter().map(String::as_str).collect::<Vec<_>>().as_slice(),
        ["test"] | ["tokio", "test"]
    )
}
