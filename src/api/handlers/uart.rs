use crate::api::routes::AppState;
use crate::error::Result;
use crate::services::uart_service::UartPortInfo;
use axum::{Json, extract::State};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct UartPortsResponse {
    pub data: Vec<UartPortInfo>,
}

pub async fn list_ports(State(state): State<AppState>) -> Result<Json<UartPortsResponse>> {
    let data = state.uart_service.list_ports()?;
    Ok(Json(UartPortsResponse { data }))
}
