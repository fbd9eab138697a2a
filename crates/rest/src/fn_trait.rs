/// A function called with its arguments packed into a tuple, the shape [`FromCall`] extraction
/// produces.
///
/// [`FromCall`]: crate::extract::FromCall
pub trait FnTrait<Args> {
    type Output;
    fn call(&self, args: Args) -> Self::Output;
}

// spreads `(A, B, ..)` into `f(A, B, ..)`
macro_rules! impl_fn_trait_for_fn ({ $($param:ident)* } => {
    impl<Func, Out, $($param,)*> FnTrait<($($param,)*)> for Func
    where
        Func: Fn($($param),*) -> Out,
    {
        type Output = Out;

        #[inline]
        #[allow(non_snake_case, reason = "type parameters double as bindings")]
        fn call(&self, ($($param,)*): ($($param,)*)) -> Self::Output {
            (self)($($param,)*)
        }
    }
});

impl_fn_trait_for_fn! {}
impl_fn_trait_for_fn! { A }
impl_fn_trait_for_fn! { A B }
impl_fn_trait_for_fn! { A B C }
impl_fn_trait_for_fn! { A B C D }
impl_fn_trait_for_fn! { A B C D E }
impl_fn_trait_for_fn! { A B C D E F }
impl_fn_trait_for_fn! { A B C D E F G }
impl_fn_trait_for_fn! { A B C D E F G H }
impl_fn_trait_for_fn! { A B C D E F G H I }
impl_fn_trait_for_fn! { A B C D E F G H I J }
impl_fn_trait_for_fn! { A B C D E F G H I J K }
impl_fn_trait_for_fn! { A B C D E F G H I J K L }
