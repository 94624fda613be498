extern crate proc_macro;
use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Field, Fields, Index, Member, Type};

/// Derives `weakptr::RefCounted` for a struct that embeds a `RefCount` header.
///
/// The header is the field marked `#[ref_count]`, or else the only field whose
/// type is named `RefCount`.
#[proc_macro_derive(RefCounted, attributes(ref_count))]
pub fn derive_ref_counted(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(expanded) => expanded,
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream> {
    let header = header_member(input)?;
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let expanded = quote! {
        unsafe impl #impl_generics ::weakptr::RefCounted for #name #ty_generics #where_clause {
            fn ref_count(&self) -> &::weakptr::RefCount {
                &self.#header
            }
        }
    };

    Ok(TokenStream::from(expanded))
}

fn header_member(input: &DeriveInput) -> syn::Result<Member> {
    let fields = match &input.data {
        Data::Struct(data) => &data.fields,
        _ => {
            return Err(syn::Error::new_spanned(
                &input.ident,
                "RefCounted can only be derived for structs",
            ))
        }
    };
    if let Fields::Unit = fields {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "RefCounted needs a RefCount field to use as the header",
        ));
    }

    let marked: Vec<_> = fields
        .iter()
        .enumerate()
        .filter(|(_, field)| field.attrs.iter().any(|a| a.path().is_ident("ref_count")))
        .collect();
    match marked.as_slice() {
        [(index, field)] => return Ok(member(*index, field)),
        [] => {}
        [_, (_, second), ..] => {
            return Err(syn::Error::new_spanned(
                second,
                "only one field may be marked #[ref_count]",
            ))
        }
    }

    let typed: Vec<_> = fields
        .iter()
        .enumerate()
        .filter(|(_, field)| is_ref_count(&field.ty))
        .collect();
    match typed.as_slice() {
        [(index, field)] => Ok(member(*index, field)),
        [] => Err(syn::Error::new_spanned(
            &input.ident,
            "no RefCount field found; mark the header field with #[ref_count]",
        )),
        [_, (_, second), ..] => Err(syn::Error::new_spanned(
            second,
            "more than one RefCount field; mark the header field with #[ref_count]",
        )),
    }
}

fn is_ref_count(ty: &Type) -> bool {
    match ty {
        Type::Path(path) if path.qself.is_none() => path
            .path
            .segments
            .last()
            .is_some_and(|segment| segment.ident == "RefCount"),
        _ => false,
    }
}

fn member(index: usize, field: &Field) -> Member {
    match &field.ident {
        Some(ident) => Member::Named(ident.clone()),
        None => Member::Unnamed(Index::from(index)),
    }
}
