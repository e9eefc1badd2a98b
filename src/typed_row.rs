//! provides rows of typed values as the host program sees them.
//! Tables are populated from `Row`s and query results are handed back as `Row`s.
//! Coercion of a row is all or nothing: if any value fails to convert, the whole row is rejected.
use crate::datum::Datum;
use crate::sql_type::SqlType;

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub items: Vec<Datum>,
}

impl Row {
    pub fn new(items: Vec<Datum>) -> Row {
        Row { items }
    }
}

impl std::fmt::Display for Row {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use itertools::Itertools;
        write!(f, "{}", self.items.iter().join("\t"))
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Casting error, column number {}, detail : {}", colnum, detail)]
    Casting {
        detail: crate::datum::Error,
        colnum: usize,
    },
    #[error("Type array and value array length mismatch: {types} types, {values} values.")]
    ArrayLenMismatch { types: usize, values: usize },
}

/// converts every value to its column's type.
pub fn coerce_row(column_types: &[SqlType], values: &[Datum]) -> Result<Row, Error> {
    if column_types.len() != values.len() {
        return Err(Error::ArrayLenMismatch {
            types: column_types.len(),
            values: values.len(),
        });
    }
    let items = values
        .iter()
        .zip(column_types.iter())
        .enumerate()
        .map(|(colnum, (v, ty))| v.coerce(*ty).map_err(|detail| Error::Casting { detail, colnum }))
        .collect::<Result<Vec<Datum>, Error>>()?;
    Ok(Row { items })
}

#[test]
fn test_coerce_row() {
    use Datum::*;
    let column_types = vec![SqlType::integer(), SqlType::numeric(6, 2), SqlType::varchar(5).as_nullable()];
    let row = coerce_row(&column_types, &[Integer(1), Integer(2), Null]).unwrap();
    assert_eq!(row.items, vec![Integer(1), Numeric(200, 2), Null]);
    assert_eq!(row.to_string(), "1\t2.00\tNULL");

    let err = coerce_row(&column_types, &[Null, Integer(2), Null]).unwrap_err();
    assert!(matches!(err, Error::Casting { colnum: 0, .. }));
    assert!(matches!(
        coerce_row(&column_types, &[Integer(1)]),
        Err(Error::ArrayLenMismatch { types: 3, values: 1 })
    ));
}
