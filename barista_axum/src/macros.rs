//! Extractors that assert a request's bearer token grants a permission

/// Constructs an extractor that validates the request's bearer token and
/// asserts that it grants a permission.
///
/// For a more concise way to construct several guards, see
/// [`permission_guards!`][crate::permission_guards!].
///
/// ```
/// use barista_axum::permission_guard;
///
/// permission_guard!(ReadDetail; "get:drinks-detail");
/// ```
///
/// A guard that accepts any valid token, whatever it grants, uses `*`:
///
/// ```
/// use barista_axum::permission_guard;
///
/// permission_guard!(pub Authenticated; *);
/// ```
///
/// The guard extracts the validated [`Claims`](barista_auth::Claims). The
/// [`Authority`](barista_auth::Authority) must be reachable from the router
/// state through [`FromRef`](axum_core::extract::FromRef). The token is only
/// validated once per request, however many guards a handler takes.
///
/// ```no_run
/// use barista_auth::Authority;
/// use barista_axum::permission_guard;
/// use axum::{routing::delete, Router};
///
/// permission_guard!(DeleteDrink; "delete:drinks");
///
/// async fn delete_drink(DeleteDrink(claims): DeleteDrink) -> String {
///     format!("deleted by {}", claims.sub())
/// }
///
/// fn router(authority: Authority) -> Router {
///     Router::new()
///         .route("/drinks/:id", delete(delete_drink))
///         .with_state(authority)
/// }
/// ```
///
/// A refused request is answered with an [`ApiError`](crate::ApiError)
/// before the handler runs.
#[macro_export]
macro_rules! permission_guard {
    (@impl $vis:vis $i:ident; $required:expr) => {
        impl $i {
            #[allow(dead_code)]
            $vis fn into_claims(self) -> $crate::__private::Claims {
                self.0
            }

            #[allow(dead_code)]
            $vis fn claims(&self) -> &$crate::__private::Claims {
                &self.0
            }
        }

        impl $crate::EndpointPermission for $i {
            fn required_permission() -> ::core::option::Option<&'static $crate::__private::PermissionRef> {
                $required
            }
        }

        #[$crate::__private::async_trait]
        impl<S> $crate::__private::FromRequestParts<S> for $i
        where
            S: ::core::marker::Send + ::core::marker::Sync,
            $crate::__private::Authority: $crate::__private::FromRef<S>,
        {
            type Rejection = $crate::ApiError;

            async fn from_request_parts(
                parts: &mut $crate::__private::Parts,
                state: &S,
            ) -> ::core::result::Result<Self, Self::Rejection> {
                let authority =
                    <$crate::__private::Authority as $crate::__private::FromRef<S>>::from_ref(state);

                $crate::__private::from_request(
                    parts,
                    &authority,
                    <Self as $crate::EndpointPermission>::required_permission(),
                )
                .await
                .map(Self)
            }
        }
    };
    ($vis:vis $i:ident; *) => {
        /// A guard that accepts any request bearing a valid token, extracting
        /// its claims
        $vis struct $i($vis $crate::__private::Claims);

        $crate::permission_guard!(@impl $vis $i; ::core::option::Option::None);
    };
    ($vis:vis $i:ident; $permission:literal) => {
        /// Ensures that the request bears a valid token granting a permission,
        /// extracting its claims
        ///
        #[doc = concat!("Required permission: `", $permission, "`")]
        $vis struct $i($vis $crate::__private::Claims);

        $crate::permission_guard!(
            @impl $vis $i;
            ::core::option::Option::Some($crate::__private::PermissionRef::from_static($permission))
        );
    };
}

/// Convenience macro for services that guard many endpoints
///
/// ```
/// use barista_axum::permission_guards;
///
/// permission_guards! {
///     pub permission Authenticated = *;
///     pub permission ReadDetail = "get:drinks-detail";
///     pub permission CreateDrink = "post:drinks";
///     permission UpdateDrink = "patch:drinks";
/// }
/// ```
///
/// Each line defines a guard as [`permission_guard!`] would.
#[macro_export]
macro_rules! permission_guards {
    ($($vis:vis permission $i:ident = $permission:tt);* $(;)?) => {
        $(
            $crate::permission_guard!($vis $i; $permission);
        )*
    };
}
