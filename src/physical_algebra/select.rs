use super::{evaluate, Emitter, Error, IuValueMap, PhysicalId};
use crate::codegen::FunctionBuilder;
use crate::expr::Expression;

/// hands on the rows for which `predicate` is true; others are dropped.
#[derive(Debug, Clone)]
pub struct Select {
    pub child: PhysicalId,
    pub predicate: Expression,
}

impl Select {
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
        let condition = evaluate(fb, &self.predicate, values)?.is_true(fb)?;
        fb.if_then::<Error, _>(condition, |fb| em.consume_parent(fb, id, values))
    }
}
