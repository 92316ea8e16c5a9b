//! Condition-set builder and SQL rendering for sqlscope.
//!
//! `sqlscope-query` owns the [`Search`] builder, the closed [`Condition`]
//! fragment type and the renderer that turns a search into SQL text plus
//! positional values.
//!
//! # Role In The Architecture
//!
//! - **Accumulation**: scopes clone and extend a `Search` per operation.
//! - **Rendering**: `Search::render` / `Search::query_sql` go through a
//!   [`RenderContext`] supplied by the caller (dialect, registry, target).
//! - **Safety**: all values are bound; see [`render::substitute`].

pub mod fragment;
pub mod render;
pub mod search;

pub use fragment::{Arg, Condition, Fragment, SqlExpr, expr};
pub use render::{
    RenderContext, TableContext, bind_arg, bind_expr, bind_value, placeholders, quote_if_possible,
    quote_table, substitute,
};
pub use search::{Order, Preload, Search};
