use proc_macro::TokenStream;
use quote::quote;
use syn::{
    Expr, ExprLit, ItemStruct, Lit, MetaNameValue, Token, parse::Parser, parse_macro_input,
    punctuated::Punctuated,
};

/// Make a serde struct storable in a `TypedCache`.
///
/// ```ignore
/// #[typed_cache(ttl = 300, prefix = "client")]
/// struct ClientSnapshot {
///     id: String,
///     markup_rate: String,
/// }
/// ```
///
/// `ttl` is in seconds and optional. `prefix` defaults to the struct name.
/// A hash of the field layout is baked into every key so that entries written
/// by an older build of the struct are never deserialized into a newer one.
#[proc_macro_attribute]
pub fn typed_cache(args: TokenStream, input: TokenStream) -> TokenStream {
    let item = parse_macro_input!(input as ItemStruct);
    let ident = &item.ident;

    let options = match CacheOptions::parse(args) {
        Ok(options) => options,
        Err(err) => return err.to_compile_error().into(),
    };

    let layout_hash = layout_hash(&item);
    let prefix = options.prefix.unwrap_or_else(|| ident.to_string());

    let ttl_body = match options.ttl {
        Some(ttl) => quote! { Some(std::time::Duration::from_secs(#ttl)) },
        None => quote! { None },
    };

    let expanded = quote! {
        #item

        impl crate::cache::CachedObject for #ident {
            fn cache_prefix() -> &'static str {
                #prefix
            }

            fn cache_type_hash() -> u64 {
                #layout_hash
            }

            fn default_ttl() -> Option<std::time::Duration> {
                #ttl_body
            }
        }
    };

    TokenStream::from(expanded)
}

#[derive(Default)]
struct CacheOptions {
    ttl: Option<u64>,
    prefix: Option<String>,
}

impl CacheOptions {
    fn parse(args: TokenStream) -> syn::Result<Self> {
        let mut options = CacheOptions::default();
        if args.is_empty() {
            return Ok(options);
        }

        let pairs = Punctuated::<MetaNameValue, Token![,]>::parse_terminated.parse(args)?;
        for pair in pairs {
            let name = pair
                .path
                .get_ident()
                .map(|ident| ident.to_string())
                .unwrap_or_default();

            match (name.as_str(), &pair.value) {
                (
                    "ttl",
                    Expr::Lit(ExprLit {
                        lit: Lit::Int(value),
                        ..
                    }),
                ) => options.ttl = Some(value.base10_parse()?),
                (
                    "prefix",
                    Expr::Lit(ExprLit {
                        lit: Lit::Str(value),
                        ..
                    }),
                ) => options.prefix = Some(value.value()),
                _ => {
                    return Err(syn::Error::new_spanned(
                        &pair,
                        "expected `ttl = <seconds>` or `prefix = \"...\"`",
                    ));
                }
            }
        }

        Ok(options)
    }
}

fn layout_hash(item: &ItemStruct) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    item.ident.to_string().hash(&mut hasher);

    for (index, field) in item.fields.iter().enumerate() {
        match &field.ident {
            Some(name) => name.to_string().hash(&mut hasher),
            None => index.hash(&mut hasher),
        }
        let ty = &field.ty;
        quote!(#ty).to_string().hash(&mut hasher);
    }

    hasher.finish()
}
