use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::Response,
};

use super::{page_context, render, PageQuery};
use crate::{
    error::Result,
    webapp::{gate::Visitor, render::Page, state::AppState},
};

// axum handler for the home page
pub async fn home(
    Extension(state): Extension<AppState>,
    Extension(visitor): Extension<Visitor>,
    Query(query): Query<PageQuery>,
) -> Result<Response> {
    let context = page_context(&state, &visitor, &query, Page::Home).await?;
    render(&state, StatusCode::OK, Page::Home, &context)
}

#[cfg(test)]
mod tests {
    use crate::webapp::{
        handlers::test_support::{body_text, TestApp},
        state::AppConfig,
    };
    use anyhow::Result;
    use axum::http::{Method, StatusCode};

    #[tokio::test]
    async fn home_shows_flash_in_requested_language() -> Result<()> {
        let app = TestApp::new(AppConfig::default()).await?;
        let response = app
            .send(Method::GET, "/?flash=User+created&lang=de", None, None)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await?;
        assert!(body.contains("User created"));
        assert!(body.contains(r#"<html lang="de">"#));
        assert!(body.contains("Startseite"));
        Ok(())
    }
}
