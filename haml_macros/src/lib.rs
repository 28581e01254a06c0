use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{FnArg, ItemFn, Pat, Type, parse_macro_input};

/// Derive a `HamlFunction` implementation from a function.
///
/// The function parameters become positional arguments. Type validation
/// is generated automatically from the parameter types, and the generated
/// signature lets `Registry::call` check arity before dispatching.
///
/// The macro emits a unit struct named after the function in PascalCase
/// with a `Function` suffix; register an instance of it.
///
/// # Attribute syntax
///
/// ```ignore
/// #[haml_function(name = "shout")]
/// #[haml_function]            // uses the function's own name
/// ```
///
/// # Supported parameter types
/// - `Value`: accepts any value, no validation
/// - `String`: validates the arg is a string, passes the inner String
/// - `f64`: validates the arg is a number, passes the inner f64
/// - `bool`: validates the arg is a bool, passes the inner bool
/// - `Vec<Value>`: validates the arg is a sequence, passes the inner Vec
/// - `Option<T>` of any of the above: an optional trailing argument
///
/// # Example
/// ```ignore
/// #[haml_function(name = "shout")]
/// fn shout(text: String, times: Option<f64>) -> Result<Value, RenderError> {
///     let times = times.unwrap_or(1.0) as usize;
///     Ok(Value::String(format!("{}!", text.to_uppercase()).repeat(times)))
/// }
///
/// registry.register(ShoutFunction);
/// ```
#[proc_macro_attribute]
pub fn haml_function(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as FunctionArgs);
    let input_fn = parse_macro_input!(item as ItemFn);

    match expand(args, &input_fn) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(args: FunctionArgs, input_fn: &ItemFn) -> syn::Result<proc_macro2::TokenStream> {
    let fn_name = &input_fn.sig.ident;
    let struct_name = format_ident!("{}Function", to_pascal_case(&fn_name.to_string()));
    let func_name = args.name.unwrap_or_else(|| fn_name.to_string());
    let vis = &input_fn.vis;

    let mut param_extractions = Vec::new();
    let mut param_names = Vec::new();
    let mut param_types = Vec::new();
    let mut param_defs = Vec::new();
    let mut seen_optional = false;

    for (index, fn_arg) in input_fn.sig.inputs.iter().enumerate() {
        let FnArg::Typed(pat_type) = fn_arg else {
            return Err(syn::Error::new_spanned(fn_arg, "`self` parameters are not supported"));
        };
        let Pat::Ident(ident) = &*pat_type.pat else {
            return Err(syn::Error::new_spanned(&pat_type.pat, "expected a plain parameter name"));
        };

        let param_name = &ident.ident;
        let param_name_str = param_name.to_string();
        let ty = &*pat_type.ty;

        let (inner, required) = match option_inner(ty) {
            Some(inner) => (inner, false),
            None => (ty, true),
        };
        if required && seen_optional {
            return Err(syn::Error::new_spanned(
                ty,
                "required parameters must come before optional ones",
            ));
        }
        seen_optional |= !required;

        let kind = param_kind(inner)?;
        let convert = &kind.convert;
        let value_type = &kind.value_type;
        let rust_type = &kind.rust_type;

        param_extractions.push(if required {
            quote! {
                let #param_name = match args.get(#index) {
                    Some(value) => (#convert)?,
                    None => return Err(haml_lang::RenderError::new(
                        haml_lang::RenderErrorKind::TypeError,
                        format!("missing required argument at position {}: {}", #index, #param_name_str),
                    )),
                };
            }
        } else {
            quote! {
                let #param_name = match args.get(#index) {
                    Some(value) => Some((#convert)?),
                    None => None,
                };
            }
        });
        param_names.push(param_name.clone());
        param_types.push(if required {
            quote! { #rust_type }
        } else {
            quote! { Option<#rust_type> }
        });
        param_defs.push(quote! {
            haml_lang::registry::ParamDef {
                name: #param_name_str.to_string(),
                expected_type: Some(#value_type),
                required: #required,
            }
        });
    }

    let fn_body = &input_fn.block;

    Ok(quote! {
        #vis struct #struct_name;

        impl #struct_name {
            fn execute(#(#param_names: #param_types),*) -> Result<haml_lang::Value, haml_lang::RenderError> {
                #fn_body
            }
        }

        impl haml_lang::registry::HamlFunction for #struct_name {
            fn call(
                &self,
                args: Vec<haml_lang::Value>,
            ) -> Result<haml_lang::Value, haml_lang::RenderError> {
                #(#param_extractions)*
                Self::execute(#(#param_names),*)
            }

            fn signature(&self) -> haml_lang::registry::FunctionSignature {
                haml_lang::registry::FunctionSignature {
                    name: #func_name.to_string(),
                    params: vec![#(#param_defs),*],
                    variadic: false,
                }
            }
        }
    })
}

/// How one parameter type is checked and converted from a `&Value`
/// bound to `value`.
struct ParamKind {
    convert: proc_macro2::TokenStream,
    value_type: proc_macro2::TokenStream,
    rust_type: proc_macro2::TokenStream,
}

fn param_kind(ty: &Type) -> syn::Result<ParamKind> {
    let type_str = quote!(#ty).to_string().replace(' ', "");

    let checked = |variant: proc_macro2::TokenStream,
                   extract: proc_macro2::TokenStream,
                   expected: &str,
                   value_type: proc_macro2::TokenStream,
                   rust_type: proc_macro2::TokenStream| ParamKind {
        convert: quote! {
            match value {
                haml_lang::Value::#variant => Ok(#extract),
                other => Err(haml_lang::RenderError::type_error(#expected, other.type_name())),
            }
        },
        value_type: quote! { haml_lang::registry::ValueType::#value_type },
        rust_type,
    };

    match type_str.as_str() {
        "Value" | "haml_lang::Value" => Ok(ParamKind {
            convert: quote! { Ok::<_, haml_lang::RenderError>(value.clone()) },
            value_type: quote! { haml_lang::registry::ValueType::Any },
            rust_type: quote! { haml_lang::Value },
        }),
        "String" => Ok(checked(
            quote! { String(s) },
            quote! { s.clone() },
            "string",
            quote! { String },
            quote! { String },
        )),
        "f64" => Ok(checked(
            quote! { Number(n) },
            quote! { *n },
            "number",
            quote! { Number },
            quote! { f64 },
        )),
        "bool" => Ok(checked(
            quote! { Bool(b) },
            quote! { *b },
            "bool",
            quote! { Bool },
            quote! { bool },
        )),
        "Vec<Value>" | "Vec<haml_lang::Value>" => Ok(checked(
            quote! { Sequence(items) },
            quote! { items.clone() },
            "sequence",
            quote! { Sequence },
            quote! { Vec<haml_lang::Value> },
        )),
        _ => Err(syn::Error::new_spanned(
            ty,
            "unsupported parameter type; expected Value, String, f64, bool or Vec<Value>",
        )),
    }
}

/// The `T` of an `Option<T>` parameter type.
fn option_inner(ty: &Type) -> Option<&Type> {
    let Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last()?;
    if segment.ident != "Option" {
        return None;
    }
    let syn::PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    match args.args.first()? {
        syn::GenericArgument::Type(inner) => Some(inner),
        _ => None,
    }
}

fn to_pascal_case(s: &str) -> String {
    s.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(c) => c.to_uppercase().chain(chars).collect(),
            }
        })
        .collect()
}

// -- Attribute arg parsing -----------------------------------------------

struct FunctionArgs {
    name: Option<String>,
}

impl syn::parse::Parse for FunctionArgs {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        if input.is_empty() {
            return Ok(FunctionArgs { name: None });
        }
        let ident: syn::Ident = input.parse()?;
        if ident != "name" {
            return Err(syn::Error::new(ident.span(), "expected `name`"));
        }
        input.parse::<syn::Token![=]>()?;
        let lit: syn::LitStr = input.parse()?;
        Ok(FunctionArgs {
            name: Some(lit.value()),
        })
    }
}
