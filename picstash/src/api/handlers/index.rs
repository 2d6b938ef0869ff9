//! Landing page with an upload form and the gallery.

use axum::{extract::State, response::Html};
use minijinja::{Environment, context};

use crate::AppState;
use crate::errors::Result;

const INDEX_TEMPLATE: &str = "index.html";

/// Build the template environment with every page embedded in the binary.
pub fn templates() -> std::result::Result<Environment<'static>, minijinja::Error> {
    let mut env = Environment::new();
    env.add_template(INDEX_TEMPLATE, include_str!("../../../templates/index.html"))?;
    Ok(env)
}

#[tracing::instrument(skip_all)]
pub async fn index(State(state): State<AppState>) -> Result<Html<String>> {
    let template = state.templates.get_template(INDEX_TEMPLATE)?;
    let page = template.render(context! {
        title => &state.config.title,
        container => &state.config.images_container,
        max_upload_mb => state.config.max_upload_mb(),
        upload_path => "/api/v1/upload",
        gallery_path => "/api/v1/gallery",
    })?;
    Ok(Html(page))
}
