//! A users / orders / products api with uploads, text responses and a redirect.
//!
//! ```text
//! curl -v http://127.0.0.1:8080/users/42
//! curl -v -H 'Content-Type: application/json' -d '{"name":"Jane","email":"jane@example.com"}' http://127.0.0.1:8080/users
//! curl -v -F name=Alice -F file=@Cargo.toml http://127.0.0.1:8080/upload
//! curl -v 'http://127.0.0.1:8080/products?category=Furniture&maxPrice=100'
//! ```

use http::StatusCode;
use micro_api::router::{Router, RouterBuilder, get, post};
use micro_api::{HandlerResult, RequestContext, Server, handler_fn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Serialize, Deserialize, Debug)]
struct User {
    name: String,
    email: String,
}

#[derive(Serialize, Deserialize, Debug)]
struct Order {
    id: String,
    #[serde(default, rename = "userId")]
    user_id: String,
    status: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct Product {
    id: String,
    name: String,
    price: f64,
    category: String,
}

fn john() -> User {
    User { name: "John Doe".into(), email: "john.doe@example.com".into() }
}

async fn list_users(ctx: &mut RequestContext) -> HandlerResult {
    let users = vec![john(), User { name: "Jane Smith".into(), email: "jane.smith@example.com".into() }];
    ctx.respond(StatusCode::OK, &users)?;
    Ok(())
}

async fn create_user(ctx: &mut RequestContext) -> HandlerResult {
    let user: User = ctx.receive().await?;
    ctx.respond(StatusCode::CREATED, &user)?;
    Ok(())
}

async fn get_user(ctx: &mut RequestContext) -> HandlerResult {
    ctx.respond(StatusCode::OK, &john())?;
    Ok(())
}

async fn update_user(ctx: &mut RequestContext) -> HandlerResult {
    let user: User = ctx.receive().await?;
    ctx.respond(StatusCode::OK, &user)?;
    Ok(())
}

async fn delete_user(ctx: &mut RequestContext) -> HandlerResult {
    let id = ctx.path_param("id").unwrap_or_default().to_owned();
    ctx.respond(StatusCode::OK, &json!({ "message": format!("User with ID {id} deleted successfully") }))?;
    Ok(())
}

async fn lock_user(ctx: &mut RequestContext) -> HandlerResult {
    let user_id = ctx.path_param("id").unwrap_or_default().to_owned();
    let lock_id = ctx.path_param("lockId").unwrap_or_default().to_owned();
    ctx.respond(
        StatusCode::OK,
        &json!({
            "message": format!("User {user_id} locked with ID {lock_id}"),
            "userId": user_id,
            "lockId": lock_id,
        }),
    )?;
    Ok(())
}

async fn search_users(ctx: &mut RequestContext) -> HandlerResult {
    let params = ctx.parameters();
    let user = User {
        name: params.get("name").cloned().unwrap_or_else(|| john().name),
        email: params.get("email").cloned().unwrap_or_else(|| john().email),
    };
    let query = json!({ "id": params.get("id"), "name": params.get("name"), "email": params.get("email") });
    ctx.respond(StatusCode::OK, &json!({ "results": [user], "query": query }))?;
    Ok(())
}

async fn user_form(ctx: &mut RequestContext) -> HandlerResult {
    let data = ctx.parameters();
    ctx.respond(StatusCode::OK, &json!({ "message": "Form data received successfully", "data": data }))?;
    Ok(())
}

async fn upload(ctx: &mut RequestContext) -> HandlerResult {
    let name = ctx.form_field("name").map(|field| field.value.clone());
    let file = ctx.form_field("file");
    let body = json!({
        "message": "File uploaded successfully",
        "fileName": file.and_then(|file| file.file_name.clone()),
        "contentType": file.and_then(|file| file.content_type.clone()),
        "name": name,
    });
    ctx.respond(StatusCode::OK, &body)?;
    Ok(())
}

async fn upload_multiple(ctx: &mut RequestContext) -> HandlerResult {
    let name = ctx.form_field("name").map(|field| field.value.clone());
    let files = ctx
        .form_fields()
        .iter()
        .filter(|(key, _)| key.starts_with("file"))
        .map(|(key, field)| {
            json!({ "fieldName": key, "fileName": field.file_name, "contentType": field.content_type })
        })
        .collect::<Vec<_>>();
    ctx.respond(StatusCode::OK, &json!({ "message": "Files uploaded successfully", "name": name, "files": files }))?;
    Ok(())
}

async fn mixed(ctx: &mut RequestContext) -> HandlerResult {
    if ctx.form_fields().is_empty() {
        let data: Value = ctx.receive().await?;
        ctx.respond(StatusCode::OK, &json!({ "type": "json", "data": data }))?;
    } else {
        let data =
            ctx.form_fields().iter().map(|(key, field)| (key.clone(), field.value.clone())).collect::<HashMap<_, _>>();
        ctx.respond(StatusCode::OK, &json!({ "type": "form", "data": data }))?;
    }
    Ok(())
}

async fn text(ctx: &mut RequestContext) -> HandlerResult {
    ctx.respond_text(StatusCode::OK, "This is a plain text response")?;
    Ok(())
}

async fn old_path(ctx: &mut RequestContext) -> HandlerResult {
    ctx.redirect("/new-path")?;
    Ok(())
}

async fn new_path(ctx: &mut RequestContext) -> HandlerResult {
    ctx.respond(StatusCode::OK, &json!({ "message": "You have been redirected to the new path" }))?;
    Ok(())
}

fn user_id(ctx: &RequestContext) -> String {
    ctx.path_param("userId").unwrap_or_default().to_owned()
}

async fn list_orders(ctx: &mut RequestContext) -> HandlerResult {
    let user_id = user_id(ctx);
    let orders = vec![
        Order { id: "order1".into(), user_id: user_id.clone(), status: "Pending".into() },
        Order { id: "order2".into(), user_id, status: "Completed".into() },
    ];
    ctx.respond(StatusCode::OK, &orders)?;
    Ok(())
}

async fn create_order(ctx: &mut RequestContext) -> HandlerResult {
    let order: Order = ctx.receive().await?;
    let order = Order { user_id: user_id(ctx), ..order };
    ctx.respond(StatusCode::CREATED, &order)?;
    Ok(())
}

async fn get_order(ctx: &mut RequestContext) -> HandlerResult {
    let order_id = ctx.path_param("orderId").unwrap_or_default().to_owned();
    let order = Order { id: order_id, user_id: user_id(ctx), status: "Pending".into() };
    ctx.respond(StatusCode::OK, &order)?;
    Ok(())
}

async fn update_order(ctx: &mut RequestContext) -> HandlerResult {
    let update: Order = ctx.receive().await?;
    let order_id = ctx.path_param("orderId").unwrap_or_default().to_owned();
    let order = Order { id: order_id, user_id: user_id(ctx), status: update.status };
    ctx.respond(StatusCode::OK, &order)?;
    Ok(())
}

async fn delete_order(ctx: &mut RequestContext) -> HandlerResult {
    let order_id = ctx.path_param("orderId").unwrap_or_default().to_owned();
    let message = format!("Order {order_id} for user {} deleted successfully", user_id(ctx));
    ctx.respond(StatusCode::OK, &json!({ "message": message }))?;
    Ok(())
}

fn catalog() -> Vec<Product> {
    let product = |id: &str, name: &str, price: f64, category: &str| Product {
        id: id.into(),
        name: name.into(),
        price,
        category: category.into(),
    };
    vec![
        product("1", "Laptop", 999.99, "Electronics"),
        product("2", "Desk", 199.99, "Furniture"),
        product("3", "Chair", 49.99, "Furniture"),
    ]
}

async fn list_products(ctx: &mut RequestContext) -> HandlerResult {
    let category = ctx.parameter("category").map(str::to_owned);
    let min_price = ctx.parameter("minPrice").and_then(|price| price.parse::<f64>().ok());
    let max_price = ctx.parameter("maxPrice").and_then(|price| price.parse::<f64>().ok());

    let products = catalog()
        .into_iter()
        .filter(|product| category.as_ref().is_none_or(|category| &product.category == category))
        .filter(|product| min_price.is_none_or(|min| product.price >= min))
        .filter(|product| max_price.is_none_or(|max| product.price <= max))
        .collect::<Vec<_>>();
    ctx.respond(StatusCode::OK, &products)?;
    Ok(())
}

async fn create_product(ctx: &mut RequestContext) -> HandlerResult {
    let product: Product = ctx.receive().await?;
    ctx.respond(StatusCode::CREATED, &product)?;
    Ok(())
}

fn orders() -> RouterBuilder {
    Router::builder()
        .route("/", get(handler_fn(list_orders)).post(handler_fn(create_order)))
        .route(
            "/{orderId}",
            get(handler_fn(get_order)).put(handler_fn(update_order)).delete(handler_fn(delete_order)),
        )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let router = Router::builder()
        .route("/users", get(handler_fn(list_users)).post(handler_fn(create_user)))
        // first match wins: these must come before /users/{id}
        .route("/users/search", get(handler_fn(search_users)))
        .route("/users/form", post(handler_fn(user_form)))
        .route(
            "/users/{id}",
            get(handler_fn(get_user)).put(handler_fn(update_user)).delete(handler_fn(delete_user)),
        )
        .route("/users/{id}/lock/{lockId}", post(handler_fn(lock_user)))
        .nest("/users/{userId}/orders", orders())
        .route("/upload", post(handler_fn(upload)))
        .route("/upload/multiple", post(handler_fn(upload_multiple)))
        .route("/mixed", post(handler_fn(mixed)))
        .route("/text", get(handler_fn(text)))
        .route("/old-path", get(handler_fn(old_path)))
        .route("/new-path", get(handler_fn(new_path)))
        .route("/products", get(handler_fn(list_products)).post(handler_fn(create_product)))
        .build()?;

    let server = Server::builder().address(("127.0.0.1", 8080)).router(router).build()?;
    info!("api server listening on http://127.0.0.1:8080");

    server.run(async { tokio::signal::ctrl_c().await.unwrap_or_default() }).await?;
    Ok(())
}
