//! Utility macros for reducing boilerplate

/// Implement `FromRef<AppState>` for a field so handlers can extract it
/// directly with `State<T>`.
///
/// ```ignore
/// impl_from_ref!(UserService, users);
/// ```
#[macro_export]
macro_rules! impl_from_ref {
    ($type:ty, $field:ident) => {
        impl axum::extract::FromRef<$crate::state::AppState> for $type {
            fn from_ref(state: &$crate::state::AppState) -> Self {
                state.$field.clone()
            }
        }
    };
}
