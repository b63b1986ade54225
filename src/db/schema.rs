table! {
    entities (kind, name) {
        kind -> Text,
        name -> Text,
        properties -> Jsonb,
    }
}
