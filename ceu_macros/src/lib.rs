//! Derive macros for reactive programs
//!
//! Programs name their resume points and events with plain enums; these
//! derives number the variants and wire them to the kernel's identifiers.
//!
//! - `#[derive(Labels)]` - variants become `Label`s `0, 1, 2, ...`
//! - `#[derive(Events)]` - variants become program `EventId`s, placed after
//!   the reserved control ids
//!
//! Both generate `From<Enum>` into the kernel type, `TryFrom` back (failing
//! with the matching `KernelError`), and the `COUNT` / `ALL` constants.
//!
//! ```ignore
//! #[derive(Clone, Copy, Debug, Labels)]
//! enum L { Boot, Tick, Done }
//!
//! #[derive(Clone, Copy, Debug, Events)]
//! enum E { Key, Led }
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, spanned::Spanned, Data, DeriveInput, Fields, Ident, Result};

/// Program event ids available after the reserved control ids.
const MAX_EVENTS: usize = 247;

#[proc_macro_derive(Labels)]
pub fn derive_labels(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_labels(&input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}

#[proc_macro_derive(Events)]
pub fn derive_events(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_events(&input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}

// ============================================================================
// PARSING
// ============================================================================

/// Variant names of a fieldless, non-generic enum without explicit
/// discriminants.
fn unit_variants(input: &DeriveInput) -> Result<Vec<Ident>> {
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new(
            input.generics.span(),
            "label and event enums cannot be generic",
        ));
    }
    let Data::Enum(data) = &input.data else {
        return Err(syn::Error::new(
            input.ident.span(),
            "only enums can derive Labels or Events",
        ));
    };
    if data.variants.is_empty() {
        return Err(syn::Error::new(
            input.ident.span(),
            "enum needs at least one variant",
        ));
    }

    data.variants
        .iter()
        .map(|v| {
            if !matches!(v.fields, Fields::Unit) {
                return Err(syn::Error::new(v.span(), "variants cannot carry fields"));
            }
            if let Some((_, expr)) = &v.discriminant {
                return Err(syn::Error::new(
                    expr.span(),
                    "variants are numbered in declaration order; drop the discriminant",
                ));
            }
            Ok(v.ident.clone())
        })
        .collect()
}

/// `COUNT` and `ALL` on the enum itself.
fn expand_consts(name: &Ident, variants: &[Ident]) -> TokenStream2 {
    let count = variants.len();
    quote! {
        impl #name {
            pub const COUNT: usize = #count;
            pub const ALL: [#name; #count] = [#(#name::#variants),*];
        }
    }
}

// ============================================================================
// EXPANSION
// ============================================================================

fn expand_labels(input: &DeriveInput) -> Result<TokenStream2> {
    let name = &input.ident;
    let variants = unit_variants(input)?;
    if variants.len() > u16::MAX as usize {
        return Err(syn::Error::new(name.span(), "too many labels"));
    }
    let raws: Vec<u16> = (0..variants.len() as u16).collect();
    let consts = expand_consts(name, &variants);

    Ok(quote! {
        #consts

        impl ::core::convert::From<#name> for ::ceu_kernel::Label {
            fn from(value: #name) -> Self {
                ::ceu_kernel::Label::new(match value {
                    #(#name::#variants => #raws,)*
                })
            }
        }

        impl ::core::convert::TryFrom<::ceu_kernel::Label> for #name {
            type Error = ::ceu_kernel::KernelError;

            fn try_from(label: ::ceu_kernel::Label) -> ::core::result::Result<Self, Self::Error> {
                match label.get() {
                    #(#raws => ::core::result::Result::Ok(#name::#variants),)*
                    _ => ::core::result::Result::Err(::ceu_kernel::KernelError::UnknownLabel { label }),
                }
            }
        }
    })
}

fn expand_events(input: &DeriveInput) -> Result<TokenStream2> {
    let name = &input.ident;
    let variants = unit_variants(input)?;
    if variants.len() > MAX_EVENTS {
        return Err(syn::Error::new(
            name.span(),
            format!("at most {MAX_EVENTS} program events fit in the id space"),
        ));
    }
    let indices: Vec<u8> = (0..variants.len()).map(|i| i as u8).collect();
    let consts = expand_consts(name, &variants);

    Ok(quote! {
        #consts

        const _: () = assert!(
            #name::COUNT <= ::ceu_kernel::EventId::USER_CAPACITY,
            "too many program events"
        );

        impl ::core::convert::From<#name> for ::ceu_kernel::EventId {
            fn from(value: #name) -> Self {
                ::ceu_kernel::EventId::from_raw(
                    ::ceu_kernel::EventId::FIRST_USER
                        + match value {
                            #(#name::#variants => #indices,)*
                        },
                )
            }
        }

        impl ::core::convert::TryFrom<::ceu_kernel::EventId> for #name {
            type Error = ::ceu_kernel::KernelError;

            fn try_from(id: ::ceu_kernel::EventId) -> ::core::result::Result<Self, Self::Error> {
                match id.user_index() {
                    #(::core::option::Option::Some(#indices) => ::core::result::Result::Ok(#name::#variants),)*
                    _ => ::core::result::Result::Err(::ceu_kernel::KernelError::UnknownEvent { id }),
                }
            }
        }
    })
}
