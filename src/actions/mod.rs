//! Built-in `core.*` actions.

use serde_json::{json, Value};

use crate::registry::{
    ActionError, ActionRegistry, ActionSpec, Kwargs, ParamSpec, RegistryError, TypeTag,
    DEFAULT_NAMESPACE,
};

/// Register every built-in action
pub fn register_builtins(registry: &mut ActionRegistry) -> Result<(), RegistryError> {
    registry.register(reshape())?;
    registry.register(math_add())?;
    Ok(())
}

fn reshape() -> ActionSpec {
    ActionSpec::new(DEFAULT_NAMESPACE, "reshape")
        .description("Return the given value unchanged")
        .version("0.1.0")
        .param(ParamSpec::required("value", TypeTag::Any).with_doc("The value to reshape"))
        .returns(TypeTag::Any)
        .handler(|mut args: Kwargs, _ctx| async move {
            Ok(args.remove("value").unwrap_or(Value::Null))
        })
}

fn math_add() -> ActionSpec {
    ActionSpec::new(format!("{DEFAULT_NAMESPACE}.math"), "add")
        .description("Add two integers")
        .version("0.1.0")
        .param(ParamSpec::required("a", TypeTag::Int).with_doc("First operand"))
        .param(ParamSpec::required("b", TypeTag::Int).with_doc("Second operand"))
        .returns(TypeTag::Int)
        .blocking_handler(|args, _ctx| {
            let operand = |name: &str| {
                args.get(name)
                    .and_then(Value::as_i64)
                    .ok_or_else(|| ActionError::fatal(format!("'{}' is not a 64-bit integer", name)))
            };
            let (a, b) = (operand("a")?, operand("b")?);
            a.checked_add(b)
                .map(|sum| json!(sum))
                .ok_or_else(|| ActionError::fatal(format!("{} + {} overflows", a, b)))
        })
}
