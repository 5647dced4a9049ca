use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, rejection::PathRejection, FromRef, Path, State},
    routing::{get, patch},
    Json, Router,
};
use barista_auth::{AuthorizationError, Authority};
use barista_axum::ApiError;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::store::{DrinkStore, Ingredient, StoreError};

barista_axum::permission_guards! {
    permission ReadDetail = "get:drinks-detail";
    permission CreateDrink = "post:drinks";
    permission UpdateDrink = "patch:drinks";
    permission DeleteDrink = "delete:drinks";
}

#[derive(Clone, Debug)]
pub struct AppState {
    authority: Authority,
    drinks: Arc<DrinkStore>,
}

impl AppState {
    pub fn new(authority: Authority, drinks: DrinkStore) -> Self {
        Self {
            authority,
            drinks: Arc::new(drinks),
        }
    }
}

impl FromRef<AppState> for Authority {
    fn from_ref(state: &AppState) -> Self {
        state.authority.clone()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/drinks", get(list_drinks).post(create_drink))
        .route("/drinks-detail", get(list_drinks_detail))
        .route("/drinks/:id", patch(update_drink).delete(delete_drink))
        .fallback(|| async { ApiError::from(AuthorizationError::not_found("resource not found")) })
        .with_state(state)
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => AuthorizationError::not_found(err.to_string()),
            StoreError::DuplicateTitle { .. } => AuthorizationError::bad_request(err.to_string()),
        }
        .into()
    }
}

fn unprocessable(rejection: JsonRejection) -> ApiError {
    AuthorizationError::unprocessable(rejection.body_text()).into()
}

fn drink_id(path: Result<Path<u64>, PathRejection>) -> Result<u64, ApiError> {
    path.map(|Path(id)| id)
        .map_err(|_| AuthorizationError::not_found("resource not found").into())
}

#[derive(Debug, Deserialize)]
struct NewDrink {
    title: String,
    recipe: Vec<Ingredient>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DrinkPatch {
    title: Option<String>,
    recipe: Option<Vec<Ingredient>>,
}

async fn list_drinks(State(state): State<AppState>) -> Json<Value> {
    let drinks = state.drinks.all().await;
    let short: Vec<_> = drinks.iter().map(|d| d.short()).collect();

    Json(json!({ "success": true, "drinks": short }))
}

async fn list_drinks_detail(_: ReadDetail, State(state): State<AppState>) -> Json<Value> {
    let drinks = state.drinks.all().await;

    Json(json!({ "success": true, "drinks": drinks }))
}

async fn create_drink(
    CreateDrink(claims): CreateDrink,
    State(state): State<AppState>,
    body: Result<Json<NewDrink>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(new) = body.map_err(unprocessable)?;

    let drink = state.drinks.insert(new.title, new.recipe).await?;
    tracing::info!(drink.id = drink.id, user = %claims.sub(), "drink created");

    Ok(Json(json!({ "success": true, "drinks": [drink] })))
}

async fn update_drink(
    UpdateDrink(claims): UpdateDrink,
    State(state): State<AppState>,
    id: Result<Path<u64>, PathRejection>,
    body: Result<Json<DrinkPatch>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let id = drink_id(id)?;
    let Json(patch) = body.map_err(unprocessable)?;

    let drink = state.drinks.update(id, patch.title, patch.recipe).await?;
    tracing::info!(drink.id = id, user = %claims.sub(), "drink updated");

    Ok(Json(json!({ "success": true, "drinks": [drink] })))
}

async fn delete_drink(
    DeleteDrink(claims): DeleteDrink,
    State(state): State<AppState>,
    id: Result<Path<u64>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let id = drink_id(id)?;

    state.drinks.remove(id).await?;
    tracing::info!(drink.id = id, user = %claims.sub(), "drink deleted");

    Ok(Json(json!({ "success": true, "deleted": id })))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };
    use barista_auth::{
        claims::{Audience, Issuer},
        testing::{self, ScriptedKeySource, TestSigner},
        Algorithm, KeyResolver, StaticKeySource, TokenValidator,
    };
    use barista_clock::{TestClock, UnixTime};
    use color_eyre::Result;
    use tower::ServiceExt;

    use super::*;

    const NOW: UnixTime = UnixTime(1_700_000_000);

    fn validator() -> TokenValidator {
        TokenValidator::new(
            Algorithm::RS256,
            Issuer::from_static(testing::ISSUER),
            Audience::from_static(testing::AUDIENCE),
        )
    }

    fn state() -> AppState {
        let keys = KeyResolver::new(StaticKeySource::new(testing::key_set()));
        AppState::new(
            Authority::new_with_clock(validator(), keys, TestClock::new(NOW)),
            DrinkStore::default(),
        )
    }

    fn bearer(permissions: &[&str]) -> String {
        TestSigner::signing().bearer(&testing::claims_json(NOW, permissions))
    }

    async fn call(
        state: &AppState,
        method: Method,
        uri: &str,
        auth: Option<&str>,
        body: Option<Value>,
    ) -> Result<(StatusCode, Value)> {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(value) = auth {
            request = request.header(header::AUTHORIZATION, value);
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body)?))?,
            None => request.body(Body::empty())?,
        };

        let response = router(state.clone()).oneshot(request).await?;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        let json = serde_json::from_slice(&bytes)?;
        Ok((status, json))
    }

    fn margarita() -> Value {
        json!({
            "title": "Margarita",
            "recipe": [
                {"name": "tequila", "color": "clear", "parts": 2},
                {"name": "lime", "color": "green", "parts": 1},
            ],
        })
    }

    #[tokio::test]
    async fn public_menu_shows_short_drinks_without_a_token() -> Result<()> {
        let state = state();
        state
            .drinks
            .insert(
                "Water".to_owned(),
                vec![Ingredient {
                    name: "water".to_owned(),
                    color: "blue".to_owned(),
                    parts: 1,
                }],
            )
            .await?;

        let (status, body) = call(&state, Method::GET, "/drinks", None, None).await?;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "success": true,
                "drinks": [{"id": 1, "title": "Water", "recipe": [{"color": "blue", "parts": 1}]}],
            })
        );
        Ok(())
    }

    #[tokio::test]
    async fn detail_requires_its_permission() -> Result<()> {
        let state = state();

        let (status, body) = call(&state, Method::GET, "/drinks-detail", None, None).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "missing_header");

        let token = bearer(&["post:drinks"]);
        let (status, body) =
            call(&state, Method::GET, "/drinks-detail", Some(&token), None).await?;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "permission_denied");

        let token = bearer(&["get:drinks-detail"]);
        let (status, body) =
            call(&state, Method::GET, "/drinks-detail", Some(&token), None).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true, "drinks": [] }));
        Ok(())
    }

    #[tokio::test]
    async fn create_then_read_the_long_form() -> Result<()> {
        let state = state();
        let token = bearer(&["post:drinks", "get:drinks-detail"]);

        let (status, body) =
            call(&state, Method::POST, "/drinks", Some(&token), Some(margarita())).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["drinks"][0]["id"], 1);
        assert_eq!(body["drinks"][0]["recipe"][0]["name"], "tequila");

        let (_, body) = call(&state, Method::GET, "/drinks-detail", Some(&token), None).await?;
        assert_eq!(body["drinks"][0]["title"], "Margarita");
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_title_is_a_bad_request() -> Result<()> {
        let state = state();
        let token = bearer(&["post:drinks"]);
        call(&state, Method::POST, "/drinks", Some(&token), Some(margarita())).await?;

        let (status, body) =
            call(&state, Method::POST, "/drinks", Some(&token), Some(margarita())).await?;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "bad_request");
        Ok(())
    }

    #[tokio::test]
    async fn undecodable_body_is_unprocessable() -> Result<()> {
        let state = state();
        let token = bearer(&["post:drinks"]);

        let (status, body) = call(
            &state,
            Method::POST,
            "/drinks",
            Some(&token),
            Some(json!({ "title": 7 })),
        )
        .await?;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], "unprocessable");
        assert!(state.drinks.all().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn guard_runs_before_the_body_is_read() -> Result<()> {
        let state = state();
        let token = bearer(&["get:drinks-detail"]);

        let (status, body) = call(
            &state,
            Method::POST,
            "/drinks",
            Some(&token),
            Some(json!({ "title": 7 })),
        )
        .await?;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "permission_denied");
        Ok(())
    }

    #[tokio::test]
    async fn patch_updates_and_reports_missing_drinks() -> Result<()> {
        let state = state();
        let token = bearer(&["post:drinks", "patch:drinks"]);
        call(&state, Method::POST, "/drinks", Some(&token), Some(margarita())).await?;

        let (status, body) = call(
            &state,
            Method::PATCH,
            "/drinks/1",
            Some(&token),
            Some(json!({ "title": "Frozen Margarita" })),
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["drinks"][0]["title"], "Frozen Margarita");
        assert_eq!(body["drinks"][0]["recipe"][1]["name"], "lime");

        let (status, body) = call(
            &state,
            Method::PATCH,
            "/drinks/9",
            Some(&token),
            Some(json!({ "title": "Ghost" })),
        )
        .await?;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");
        Ok(())
    }

    #[tokio::test]
    async fn delete_removes_the_drink() -> Result<()> {
        let state = state();
        let token = bearer(&["post:drinks", "delete:drinks"]);
        call(&state, Method::POST, "/drinks", Some(&token), Some(margarita())).await?;

        let (status, body) = call(&state, Method::DELETE, "/drinks/1", Some(&token), None).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true, "deleted": 1 }));

        let (status, _) = call(&state, Method::DELETE, "/drinks/1", Some(&token), None).await?;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&state, Method::DELETE, "/drinks/abc", Some(&token), None).await?;
        assert_eq!(status, StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn expired_token_is_refused() -> Result<()> {
        let state = state();
        let token = TestSigner::signing().bearer(&testing::claims_json(
            UnixTime(NOW.0 - 7200),
            &["delete:drinks"],
        ));

        let (status, body) = call(&state, Method::DELETE, "/drinks/1", Some(&token), None).await?;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "token_expired");
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_key_provider_is_unauthorized() -> Result<()> {
        let source = ScriptedKeySource::new().then_error(barista_auth::KeyFetchError::Timeout);
        let state = AppState::new(
            Authority::new_with_clock(validator(), KeyResolver::new(source), TestClock::new(NOW)),
            DrinkStore::default(),
        );
        let token = bearer(&["get:drinks-detail"]);

        let (status, body) =
            call(&state, Method::GET, "/drinks-detail", Some(&token), None).await?;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "key_fetch_error");
        Ok(())
    }

    #[tokio::test]
    async fn unknown_routes_are_not_found() -> Result<()> {
        let (status, body) = call(&state(), Method::GET, "/cocktails", None, None).await?;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        Ok(())
    }
}
