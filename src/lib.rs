/// Common parts of the wire format: rows, typed binary data, the value graph.
pub mod protocol;
/// Producer side: encodes a value graph into rows.
pub mod server;
/// Consumer side: chunk table, module map translation.
pub mod client;
/// Tokio `AsyncRead`/`AsyncWrite` adapters.
pub mod stream;
/// Settings loading.
pub mod config;
/// Flexible logging (formatting, filters, sinks).
pub mod logging;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Consumer side: sessions, chunks, module maps and loaders.
pub use client::{
    Chunk, ChunkStatus, CollectingLoader, DecodeOptions, DecodeSession, ModuleLoader,
    ModuleLoading, ModuleMap, ScriptLoad,
};
/// config
pub use config::Settings;
/// Errors shared by both sides.
pub use flight_error::{FlightResult, StackError, StatusCode};
/// Logging bootstrap.
pub use logging::{init_logging, LoggingConfig, LoggingHandle};
/// Rows, binary views and the value graph.
pub use protocol::{
    BinaryView, ClientReference, ElementKind, ModuleReference, Row, RowDecoder, RowId, RowTag,
    Thenable, Value,
};
/// Producer side: rendering requests and resolving client references.
pub use server::{
    render, ClientManifest, EncodeOptions, FlightRequest, ReferenceResolver, RequestHandle,
    RowStream,
};
/// Stream adapters.
pub use stream::{create_from_reader, render_to_writer, ReadDriver};
