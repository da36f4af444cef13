use proc_macro2::{Span, TokenStream};
use quote::quote;
use syn::{parse_macro_input, Attribute, Data, DeriveInput, Error, Fields, Result, Type};

/// Implements `multicopy::FromShm`, viewing the start of a mapped segment as
/// `Self` after checking its length and alignment.
///
/// The mapped bytes may come from another process, so every bit pattern must
/// be a valid `Self`. Fields of type `bool`, `char`, references, function
/// pointers and `!` are rejected here. Other named types, including nested
/// structs, are trusted: deriving on a struct that contains them asserts
/// that they are valid for any bit pattern as well.
#[proc_macro_derive(FromShm)]
pub fn derive_from_shm(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let name = input.ident;

    if !input.generics.params.is_empty() {
        return Error::new(name.span(), "FromShm: generic structs are not supported")
            .into_compile_error()
            .into();
    }

    if let Err(err) = check_repr_c(&input.attrs, &name.span(), "FromShm") {
        return err.into_compile_error().into();
    }

    if let Err(err) = check_fields(&input.data) {
        return err.into_compile_error().into();
    }

    let from_shm = match from_shm_impl(&input.data, &name, false) {
        Ok(tokens) => tokens,
        Err(err) => return err.into_compile_error().into(),
    };
    let from_shm_mut = match from_shm_impl(&input.data, &name, true) {
        Ok(tokens) => tokens,
        Err(err) => return err.into_compile_error().into(),
    };

    let expanded = quote! {
        unsafe impl multicopy::FromShm for #name {
            fn from_shm(shm: &multicopy::Shm) -> multicopy::Result<&Self> {
                #from_shm
            }

            fn from_shm_mut(shm: &mut multicopy::Shm) -> multicopy::Result<&mut Self> {
                #from_shm_mut
            }
        }
    };

    proc_macro::TokenStream::from(expanded)
}

fn from_shm_impl(data: &Data, name: &syn::Ident, is_mut: bool) -> Result<TokenStream> {
    match *data {
        Data::Struct(ref data) => match data.fields {
            Fields::Named(_) | Fields::Unnamed(_) | Fields::Unit => {
                let (mut_tok, const_tok, method) = if is_mut {
                    (quote! { mut }, quote! { mut }, quote! { as_mut_ptr })
                } else {
                    (quote! {}, quote! { const }, quote! { as_ptr })
                };
                Ok(quote! {
                    let size = ::core::mem::size_of::<Self>();
                    if shm.len() < size {
                        return Err(multicopy::Error::SizeError(shm.len()));
                    }
                    let ptr = shm[..size].#method() as *#const_tok Self;
                    if !ptr.is_aligned() {
                        return Err(multicopy::Error::AlignmentError(::core::mem::align_of::<Self>()));
                    }
                    unsafe { Ok(&#mut_tok *ptr) }
                })
            }
        },
        Data::Enum(_) | Data::Union(_) => Err(Error::new(
            name.span(),
            "FromShm: only structs can be viewed in shared memory",
        )),
    }
}

fn check_fields(data: &Data) -> Result<()> {
    if let Data::Struct(data) = data {
        for field in data.fields.iter() {
            check_field_type(&field.ty)?;
        }
    }
    Ok(())
}

fn check_field_type(ty: &Type) -> Result<()> {
    match ty {
        Type::Array(array) => check_field_type(&array.elem),
        Type::Paren(inner) => check_field_type(&inner.elem),
        Type::Group(inner) => check_field_type(&inner.elem),
        Type::Tuple(tuple) => tuple.elems.iter().try_for_each(check_field_type),
        Type::Path(path) if path.qself.is_none() => match path.path.get_ident() {
            Some(ident) if ident == "bool" || ident == "char" => Err(Error::new_spanned(
                ty,
                format!("FromShm: `{ident}` has invalid bit patterns, use an integer"),
            )),
            _ => Ok(()),
        },
        Type::Reference(_) | Type::BareFn(_) | Type::Never(_) => Err(Error::new_spanned(
            ty,
            "FromShm: field type is not valid for every bit pattern",
        )),
        _ => Ok(()),
    }
}

fn check_repr_c(attrs: &[Attribute], span: &Span, trait_name: &str) -> Result<()> {
    let mut has_repr = false;
    let err_msg = &format!("{}: struct must be repr(C)", trait_name);
    for attr in attrs {
        if attr.path().is_ident("repr") {
            has_repr = true;
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("C") {
                    Ok(())
                } else {
                    Err(meta.error(err_msg))
                }
            })?;
        }
    }
    if has_repr {
        Ok(())
    } else {
        Err(Error::new(*span, err_msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn integer_fields_and_arrays_are_accepted() {
        let ok: [Type; 4] = [
            parse_quote!(u64),
            parse_quote!([u8; 1_000_000]),
            parse_quote!([Block; BLOCK_NUM]),
            parse_quote!((usize, i32)),
        ];
        for ty in &ok {
            assert!(check_field_type(ty).is_ok());
        }
    }

    #[test]
    fn fields_with_invalid_bit_patterns_are_rejected() {
        let bad: [Type; 5] = [
            parse_quote!(bool),
            parse_quote!([char; 4]),
            parse_quote!(&'static u8),
            parse_quote!(fn()),
            parse_quote!((u8, bool)),
        ];
        for ty in &bad {
            assert!(check_field_type(ty).is_err());
        }
    }

    #[test]
    fn struct_with_bool_field_is_rejected() {
        let input: DeriveInput = parse_quote! {
            #[repr(C)]
            struct Flags {
                len: usize,
                error: bool,
            }
        };
        assert!(check_fields(&input.data).is_err());
    }
}
