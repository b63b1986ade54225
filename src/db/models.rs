use super::schema::entities;

#[derive(Debug)]
#[derive(Queryable, QueryableByName, Insertable)]
#[table_name = "entities"]
pub struct EntityRow {
    pub kind: String,
    pub name: String,
    pub properties: serde_json::Value,
}
