use proc_macro::TokenStream;
use quote::quote;
use syn::{ItemFn, parse_macro_input};

/// Marks a test whose body runs inside a per-test tracing span, so cluster
/// logs from a failing test carry its name.
///
/// Plain functions expand to `#[test]`; `async fn` expands to
/// `#[tokio::test]` and any arguments (`flavor`, `worker_threads`) are passed
/// through. Other attributes on the function, `#[should_panic]` included,
/// are kept as written.
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args_ts = proc_macro2::TokenStream::from(attr);
    let input = parse_macro_input!(item as ItemFn);
    let attrs = &input.attrs;
    let vis = &input.vis;
    let sig = &input.sig;
    let block = &input.block;
    let name = &input.sig.ident;

    let is_async = sig.asyncness.is_some();

    let paren_args = if args_ts.is_empty() {
        quote! {}
    } else {
        quote! { ( #args_ts ) }
    };

    let output = if is_async {
        quote! {
            #[::tokio::test #paren_args]
            #(#attrs)*
            #vis #sig {
                ::regionsim::trace::with_test_tracing(stringify!(#name), || async move #block).await
            }
        }
    } else {
        quote! {
            #[test]
            #(#attrs)*
            #vis #sig {
                ::regionsim::trace::with_test_tracing_sync(stringify!(#name), || #block)
            }
        }
    };
    output.into()
}
