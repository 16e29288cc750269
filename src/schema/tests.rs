use super::*;

fn base_schema() -> Schema {
    Schema::new(
        "t1",
        1,
        vec![
            Column::new("name", ColumnType::String, false),
            Column::new("age", ColumnType::I32, true),
        ],
    )
}

#[test]
fn accepts_additive_nullable_column() {
    let mut next = base_schema();
    next.version = 2;
    next.columns.push(Column::new("email", ColumnType::String, true));
    assert!(base_schema().evolve(&next).is_ok());
}

#[test]
fn rejects_non_nullable_new_column() {
    let mut next = base_schema();
    next.version = 2;
    next.columns.push(Column::new("email", ColumnType::String, false));
    assert_eq!(
        base_schema().evolve(&next),
        Err(SchemaError::NewColumnNotNullable("email".into()))
    );
}

#[test]
fn accepts_widening_i32_to_i64() {
    let mut next = base_schema();
    next.version = 2;
    next.columns[1].column_type = ColumnType::I64;
    assert!(base_schema().evolve(&next).is_ok());
}

#[test]
fn rejects_narrowing() {
    let mut next = base_schema();
    next.version = 2;
    next.columns[0].column_type = ColumnType::Bytes;
    assert_eq!(
        base_schema().evolve(&next),
        Err(SchemaError::IncompatibleTypeChange("name".into()))
    );
}

#[test]
fn rejects_column_removal() {
    let mut next = base_schema();
    next.version = 2;
    next.columns.remove(1);
    assert_eq!(
        base_schema().evolve(&next),
        Err(SchemaError::ColumnRemoved("age".into()))
    );
}

#[test]
fn rejects_nullability_tightening() {
    let mut next = base_schema();
    next.version = 2;
    next.columns[0].nullable = false;
    // "name" was already non-nullable so this is a no-op; tighten "age" instead.
    next.columns[1].nullable = false;
    assert_eq!(
        base_schema().evolve(&next),
        Err(SchemaError::NullabilityChanged("age".into()))
    );
}

#[test]
fn rejects_non_increasing_version() {
    let next = base_schema();
    assert_eq!(
        base_schema().evolve(&next),
        Err(SchemaError::VersionNotIncreasing { have: 1, got: 1 })
    );
}

#[test]
fn schema_round_trips_through_encoding() {
    let schema = base_schema();
    let bytes = crate::encoding::encode_to_vec(&schema).unwrap();
    let (decoded, _) = crate::encoding::decode_from_slice::<Schema>(&bytes).unwrap();
    assert_eq!(decoded, schema);
}
