/// Single-page chat UI served for every non-history `GET`.
pub const INDEX_HTML: &str = include_str!("../assets/index.html");
