//! Built-in challenges shipped with the game.

use crate::challenge::{
    ChallengeDefinition, ChallengeRegistry, Difficulty, Validation, ValidationInput,
};
use crate::runner::TestCase;
use crate::value::Value;
use serde_json::json;
use tracing::error;

pub const SECURITY_INITIALIZATION: &str = "security-initialization";
pub const LOGIC_GATES: &str = "logic-gates";
pub const VARIABLE_DECLARATION: &str = "variable-declaration";
pub const ARRAY_OPERATIONS: &str = "array-operations";

/// Register every built-in challenge.
pub fn register_all(registry: &mut ChallengeRegistry) {
    let builtins = [
        (SECURITY_INITIALIZATION, security_initialization()),
        (LOGIC_GATES, logic_gates()),
        (VARIABLE_DECLARATION, variable_declaration()),
        (ARRAY_OPERATIONS, array_operations()),
    ];
    for (id, definition) in builtins {
        if let Err(e) = registry.register(id, definition) {
            error!(challenge = id, error = %e, "failed to register built-in challenge");
        }
    }
}

pub fn security_initialization() -> ChallengeDefinition {
    ChallengeDefinition::new()
        .title("Security Initialization")
        .description(
            "Initialize a variable called securityCode and set its value to \"9876\" to activate the security system.",
        )
        .difficulty(Difficulty::Beginner)
        .initial_code(
            "// Write your code below to initialize the security system\n\n// When finished, run your code to continue",
        )
        .solution_code("let securityCode = \"9876\";")
        .hint("Use the let keyword to declare a variable.")
        .hint("String values should be enclosed in quotes.")
        .hint("Make sure the variable name matches exactly what's required: securityCode")
        .observe("securityCode")
        .skill_type("variables")
        .category("basics")
        .test_case(TestCase::reading(
            "The securityCode variable should be set to \"9876\"",
            "securityCode",
            "9876",
        ))
        .validator(validate_security_code)
}

fn validate_security_code(input: &ValidationInput<'_>) -> Validation {
    let code = input.binding("securityCode");
    if code.is_undefined() {
        return Validation::failure("The securityCode variable hasn't been defined yet.");
    }
    if code.as_str() != Some("9876") {
        return Validation::failure(format!(
            "The securityCode variable should be set to \"9876\", but it's currently set to \"{}\".",
            code
        ));
    }
    Validation::success("Success! The security system has been activated.")
}

const GATE_COMBINATIONS: &[([bool; 3], bool, &str)] = &[
    ([true, true, false], true, "Gate 1 and 2 true, Gate 3 false"),
    ([true, false, false], false, "Gate 1 true, Gate 2 and 3 false"),
    ([false, true, false], false, "Gate 2 true, Gate 1 and 3 false"),
    ([false, false, true], true, "Gate 1 and 2 false, Gate 3 true"),
    ([true, true, true], true, "All gates true"),
];

pub fn logic_gates() -> ChallengeDefinition {
    let mut definition = ChallengeDefinition::new()
        .title("Logic Gates")
        .description(
            "Create logical conditions to route the power through the correct gates. \
             You need to write a function called routePower that takes three parameters: \
             `gate1`, `gate2`, and `gate3`. The function should return true if either gate1 is true \
             AND gate2 is true, OR if gate3 is true.",
        )
        .difficulty(Difficulty::Beginner)
        .initial_code(
            "// Write a function to route power through the logic gates\nfunction routePower(gate1, gate2, gate3) {\n  // Your code here\n}\n",
        )
        .solution_code("function routePower(gate1, gate2, gate3) {\n  return (gate1 && gate2) || gate3;\n}")
        .hint("Use the && operator for logical AND.")
        .hint("Use the || operator for logical OR.")
        .hint("Remember the order of operations: AND is evaluated before OR.")
        .hint("You can use parentheses to group expressions.")
        .observe("routePower")
        .skill_type("conditionals")
        .category("logic");

    for (gates, expected, description) in GATE_COMBINATIONS {
        definition = definition.test_case(TestCase::calling(
            *description,
            "routePower",
            json!(gates),
            *expected,
        ));
    }
    definition.validator(validate_logic_gates)
}

fn validate_logic_gates(input: &ValidationInput<'_>) -> Validation {
    if !input.binding("routePower").is_function() {
        return Validation::failure("The routePower function hasn't been defined yet.");
    }
    if let Some(failed) = input.test_results.iter().find(|r| !r.passed) {
        let gates = match &failed.input {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        let gate = |i: usize| gates.get(i).cloned().unwrap_or_default();
        return Validation::failure(format!(
            "Logic error: when gate1={}, gate2={}, gate3={}, expected {} but got {}.",
            gate(0),
            gate(1),
            gate(2),
            failed.expected,
            failed.actual
        ));
    }
    Validation::success("Success! The power is now flowing correctly through the gates.")
}

pub fn variable_declaration() -> ChallengeDefinition {
    ChallengeDefinition::new()
        .title("Variable Declaration")
        .description(
            "Declare and initialize variables of different types to store agent information. \
             Create three variables: `agentName` (string), `agentAge` (number), and `isAuthorized` (boolean). \
             Set them to \"Agent X\", 30, and true, respectively.",
        )
        .difficulty(Difficulty::Beginner)
        .initial_code("// Declare and initialize three variables of different types\n\n")
        .solution_code("const agentName = \"Agent X\";\nconst agentAge = 30;\nconst isAuthorized = true;")
        .hint("Use const or let to declare variables.")
        .hint("Strings need to be in quotes, numbers do not.")
        .hint("Boolean values are true or false (without quotes).")
        .hint("Remember to use semicolons at the end of each statement.")
        .observe("agentName")
        .observe("agentAge")
        .observe("isAuthorized")
        .skill_type("variables")
        .category("basics")
        .test_case(TestCase::reading(
            "The agentName should be \"Agent X\"",
            "agentName",
            "Agent X",
        ))
        .test_case(TestCase::reading("The agentAge should be 30", "agentAge", 30i64))
        .test_case(TestCase::reading(
            "The isAuthorized should be true",
            "isAuthorized",
            true,
        ))
        .validator(validate_agent_variables)
}

fn validate_agent_variables(input: &ValidationInput<'_>) -> Validation {
    let name = input.binding("agentName");
    if name.as_str().is_none() {
        return Validation::failure("The agentName variable should be a string.");
    }
    if name.as_str() != Some("Agent X") {
        return Validation::failure(format!(
            "The agentName should be \"Agent X\", but got \"{}\".",
            name
        ));
    }

    let age = input.binding("agentAge");
    if age.as_f64().is_none() {
        return Validation::failure("The agentAge variable should be a number.");
    }
    if age.as_f64() != Some(30.0) {
        return Validation::failure(format!("The agentAge should be 30, but got {}.", age));
    }

    let authorized = input.binding("isAuthorized");
    if authorized.as_bool().is_none() {
        return Validation::failure("The isAuthorized variable should be a boolean.");
    }
    if authorized.as_bool() != Some(true) {
        return Validation::failure("The isAuthorized should be true.");
    }

    Validation::success("Success! Agent information has been properly stored.")
}

pub fn array_operations() -> ChallengeDefinition {
    ChallengeDefinition::new()
        .title("Array Operations")
        .description(
            "Write a function called processData that takes an array of numbers and returns a new array \
             where every odd number is tripled and every even number is doubled.",
        )
        .difficulty(Difficulty::Intermediate)
        .initial_code("// Transform the sensor readings\nfunction processData(values) {\n  // Your code here\n}\n")
        .solution_code(
            "function processData(values) {\n  return values.map(v => (v % 2 === 0 ? v * 2 : v * 3));\n}",
        )
        .hint("Arrays have a map method that builds a new array.")
        .hint("Use the % operator to check whether a number is even.")
        .hint("Keep the values in their original order.")
        .observe("processData")
        .skill_type("arrays")
        .category("data")
        .test_case(TestCase::calling(
            "Odd numbers are tripled and even numbers doubled",
            "processData",
            json!([[1, 2, 3, 4]]),
            json!([3, 4, 9, 8]),
        ))
        .test_case(TestCase::calling(
            "An empty array stays empty",
            "processData",
            json!([[]]),
            json!([]),
        ))
        .validator(validate_process_data)
}

fn validate_process_data(input: &ValidationInput<'_>) -> Validation {
    if !input.binding("processData").is_function() {
        return Validation::failure("The processData function hasn't been defined yet.");
    }
    if let Some(failed) = input.test_results.iter().find(|r| !r.passed) {
        if let Some(error) = &failed.error {
            return Validation::failure(format!("processData failed: {}", error));
        }
        return Validation::failure(format!(
            "processData should return {}, but returned {}.",
            failed.expected.inspect(),
            failed.actual.inspect()
        ));
    }
    Validation::success("Success! The sensor data has been processed correctly.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::TestResult;
    use std::collections::BTreeMap;

    fn bindings(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn check(
        validator: fn(&ValidationInput<'_>) -> Validation,
        bindings: &BTreeMap<String, Value>,
        tests: &[TestResult],
    ) -> Validation {
        validator(&ValidationInput {
            result: &Value::Undefined,
            bindings,
            test_results: tests,
        })
    }

    #[test]
    fn test_registers_four_builtins() {
        let registry = ChallengeRegistry::with_builtins();
        assert_eq!(registry.len(), 4);
        for id in [
            SECURITY_INITIALIZATION,
            LOGIC_GATES,
            VARIABLE_DECLARATION,
            ARRAY_OPERATIONS,
        ] {
            assert!(registry.get(id).is_some(), "{} missing", id);
        }
        assert_eq!(registry.list_by_category("basics").len(), 2);
    }

    #[test]
    fn test_security_messages() {
        let missing = check(validate_security_code, &bindings(&[]), &[]);
        assert_eq!(
            missing.message,
            "The securityCode variable hasn't been defined yet."
        );

        let wrong = check(
            validate_security_code,
            &bindings(&[("securityCode", Value::from("1234"))]),
            &[],
        );
        assert!(!wrong.success);
        assert_eq!(
            wrong.message,
            "The securityCode variable should be set to \"9876\", but it's currently set to \"1234\"."
        );

        let ok = check(
            validate_security_code,
            &bindings(&[("securityCode", Value::from("9876"))]),
            &[],
        );
        assert!(ok.success);
    }

    #[test]
    fn test_security_rejects_number() {
        let verdict = check(
            validate_security_code,
            &bindings(&[("securityCode", Value::Number(9876.0))]),
            &[],
        );
        assert!(!verdict.success);
    }

    #[test]
    fn test_logic_gate_case_order() {
        let inputs: Vec<Value> = logic_gates()
            .test_cases
            .unwrap_or_default()
            .iter()
            .filter_map(|case| case.input.clone())
            .collect();
        let expected: Vec<Value> = [
            json!([true, true, false]),
            json!([true, false, false]),
            json!([false, true, false]),
            json!([false, false, true]),
            json!([true, true, true]),
        ]
        .into_iter()
        .map(Value::from)
        .collect();
        assert_eq!(inputs, expected);
    }

    #[test]
    fn test_logic_gate_failure_message() {
        let failed = TestResult {
            description: "Gate 1 true, Gate 2 and 3 false".to_string(),
            input: Some(Value::from(json!([true, false, false]))),
            passed: false,
            expected: Value::Bool(false),
            actual: Value::Bool(true),
            error: None,
        };
        let verdict = check(
            validate_logic_gates,
            &bindings(&[(
                "routePower",
                Value::Function {
                    name: "routePower".into(),
                },
            )]),
            &[failed],
        );
        assert_eq!(
            verdict.message,
            "Logic error: when gate1=true, gate2=false, gate3=false, expected false but got true."
        );

        let undefined = check(validate_logic_gates, &bindings(&[]), &[]);
        assert_eq!(
            undefined.message,
            "The routePower function hasn't been defined yet."
        );
    }

    #[test]
    fn test_agent_messages() {
        let wrong_age = check(
            validate_agent_variables,
            &bindings(&[
                ("agentName", Value::from("Agent X")),
                ("agentAge", Value::Number(31.0)),
                ("isAuthorized", Value::Bool(true)),
            ]),
            &[],
        );
        assert_eq!(wrong_age.message, "The agentAge should be 30, but got 31.");

        let string_age = check(
            validate_agent_variables,
            &bindings(&[
                ("agentName", Value::from("Agent X")),
                ("agentAge", Value::from("30")),
            ]),
            &[],
        );
        assert_eq!(
            string_age.message,
            "The agentAge variable should be a number."
        );

        let ok = check(
            validate_agent_variables,
            &bindings(&[
                ("agentName", Value::from("Agent X")),
                ("agentAge", Value::Number(30.0)),
                ("isAuthorized", Value::Bool(true)),
            ]),
            &[],
        );
        assert!(ok.success);
    }
}
