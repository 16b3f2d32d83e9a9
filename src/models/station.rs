use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, PartialEq)]
pub struct Station {
    pub id: i64,
    pub external_id: i64, // upstream tele_station id
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub bank_level: Option<f64>,
    pub is_active: bool,
}
