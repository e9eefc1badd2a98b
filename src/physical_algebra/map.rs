use super::{evaluate, Emitter, Error, IuValueMap, PhysicalId};
use crate::codegen::FunctionBuilder;
use crate::expr::Expression;
use crate::iu::IuRef;

/// adds computed values to every row.
#[derive(Debug, Clone)]
pub struct Map {
    pub child: PhysicalId,
    pub mappings: Vec<(IuRef, Expression)>,
}

impl Map {
    pub(super) fn produce(&self, em: &mut Emitter, fb: &mut FunctionBuilder) -> Result<(), Error> {
        em.produce(fb, self.child)
    }

    pub(super) fn consume(
        &self,
        em: &mut Emitter,
        fb: &mut FunctionBuilder,
        id: PhysicalId,
        values: &IuValueMap,
    ) -> Result<(), Error> {
        let mut extended = values.clone();
        for (iu, expression) in &self.mappings {
            let v = evaluate(fb, expression, values)?;
            extended.insert(*iu, v.with_type_nullability(fb, iu.ty())?);
        }
        em.consume_parent(fb, id, &extended)
    }
}
