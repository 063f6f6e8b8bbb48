//! Endpoint handlers and the route table tying them to paths.

pub mod cluster;
pub mod gather;
pub mod primary;
pub mod search;
pub mod unknown;
pub mod update;
pub mod utils;

use http::Method;
use serde_json::json;
use std::sync::Arc;

use crate::handler::Handler;
use crate::merger::GatherPolicy;
use crate::router::{Route, Router};
use cluster::{ClusterDetailsHandler, StaticHandler};
use gather::GatherHandler;
use primary::PrimaryNodeHandler;
use search::{MultiSearchHandler, SearchHandler};
use unknown::UnknownHandler;
use update::UpdateHandler;

fn gather(name: &'static str, policy: GatherPolicy) -> Arc<dyn Handler> {
    Arc::new(GatherHandler::new(name, policy))
}

/// Builds the route table.
///
/// Order matters: fixed paths come before the `/:index/...` patterns that
/// would also match them, and `/:index/:type/:id` comes last.
pub fn router() -> Router {
    let tasks = gather("tasks", GatherPolicy::MapUnion(Some("tasks")));
    let nodes = gather("nodes", GatherPolicy::MapUnion(Some("nodes")));
    let aliases = gather("aliases", GatherPolicy::MapUnion(None));
    let first = gather("first", GatherPolicy::First);
    let sum = gather("sum", GatherPolicy::Sum);
    let cat = gather("cat", GatherPolicy::Concat);
    let stats = gather("stats", GatherPolicy::IndexStats);
    let template = gather("template", GatherPolicy::MinSchemaVersion);
    let fields = gather("fields", GatherPolicy::FieldCatalog);
    let get_document = gather("get_document", GatherPolicy::FirstFound);
    let users: Arc<dyn Handler> = Arc::new(PrimaryNodeHandler::new("users").with_write_refresh());
    let master: Arc<dyn Handler> = Arc::new(PrimaryNodeHandler::new("cat_master"));
    let search: Arc<dyn Handler> = Arc::new(SearchHandler);
    let msearch: Arc<dyn Handler> = Arc::new(MultiSearchHandler);
    let update: Arc<dyn Handler> = Arc::new(UpdateHandler);
    let details: Arc<dyn Handler> = Arc::new(ClusterDetailsHandler);
    let settings: Arc<dyn Handler> = Arc::new(StaticHandler::json(
        "cluster_settings",
        json!({"persistent": {}, "transient": {}}),
    ));
    let head_root: Arc<dyn Handler> = Arc::new(StaticHandler::empty("head_root"));

    let get = |pattern, handler: &Arc<dyn Handler>| {
        Route::new(Some(Method::GET), pattern, handler.clone())
    };
    let post = |pattern, handler: &Arc<dyn Handler>| {
        Route::new(Some(Method::POST), pattern, handler.clone())
    };

    let routes = vec![
        get("/_tasks", &tasks),
        post("/_tasks/:task/_cancel", &first),
        get("/_cluster/nodes/stats", &nodes),
        get("/_nodes", &nodes),
        get("/_nodes/stats", &nodes),
        get("/_nodes/stats/:kinds", &nodes),
        get("/_cluster/health", &sum),
        get("/_cluster/settings", &settings),
        get("/_cluster/:type/details", &details),
        get("/_template/MULTIPREFIX_sessions2_template", &template),
        get("/users/user/:user", &users),
        get("/users/_doc/:user", &users),
        post("/users/user/:user", &users),
        post("/users/_doc/:user", &users),
        get("/_cat/master", &master),
        get("/_cat/*", &cat),
        post("/MULTIPREFIX_fields/field/_search", &fields),
        post("/MULTIPREFIX_fields/_search", &fields),
        post("/_msearch", &msearch),
        post("/:index/_msearch", &msearch),
        post("/:index/:type/_msearch", &msearch),
        get("/:index/_search", &search),
        get("/:index/:type/_search", &search),
        post("/:index/_search", &search),
        post("/:index/:type/_search", &search),
        post("/:index/_update/:id", &update),
        post("/:index/:type/:id/_update", &update),
        post("/:index/history", &first),
        post("/*history*/_doc", &first),
        get("/:index/_count", &sum),
        get("/:index/:type/_count", &sum),
        post("/:index/_count", &sum),
        post("/:index/:type/_count", &sum),
        get("/:index/_aliases", &aliases),
        get("/:index/_alias", &aliases),
        get("/:index/_stats", &stats),
        get("/:index/:type/:id", &get_document),
        Route::new(Some(Method::HEAD), "/", head_root),
        get("/", &first),
    ];

    Router::new(routes, Arc::new(UnknownHandler))
}
