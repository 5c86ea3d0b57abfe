use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A variable defined in the notebook kernel, as reported by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub value: Value,
}

const EXAMPLE: &str = r#"<Example>

Defined Variables:
{
    'loan_multiplier': 1.5,
    'sales_df': pd.DataFrame({
        'transaction_date': ['2024-01-02', '2024-01-02', '2024-01-02', '2024-01-02', '2024-01-03'],
        'price_per_unit': [10, 9.99, 13.99, 21.00, 100],
        'units_sold': [1, 2, 1, 4, 5],
        'total_price': [10, 19.98, 13.99, 84.00, 500]
    })
}

Code in the active code cell:
```python
import pandas as pd
sales_df = pd.read_csv('./sales.csv')
```

Your task: convert the transaction_date column to datetime and then multiply the total_price column by the loan_multiplier.

Output:

```python
import pandas as pd
sales_df = pd.read_csv('./sales.csv')
sales_df['transaction_date'] = pd.to_datetime(sales_df['transaction_date'])
sales_df['total_price'] = sales_df['total_price'] * loan_multiplier
```

Converted the `transaction_date` column to datetime using the built-in pd.to_datetime function and multiplied the `total_price` column by the `loan_multiplier` variable.

</Example>"#;

const RULES: &str = "When responding:
- Do not use the word \"I\"
- Do not recreate variables that already exist
- Keep as much of the original code as possible";

/// Prompt for a free-form request against the active cell.
pub fn basic_prompt(
    variables: &[Variable],
    active_code: &str,
    input: &str,
    language: &str,
) -> String {
    let mut out = format!(
        "You are an expert {language} programmer writing a script in a Jupyter notebook. \
         You are given a set of variables, existing code, and a task.\n\n\
         Respond with the updated active code cell and a short explanation of the changes you made.\n\n"
    );
    out.push_str(RULES);
    out.push_str("\n\n");
    out.push_str(EXAMPLE);
    out.push_str("\n\n");
    push_context(&mut out, variables, active_code, language);
    out.push_str(&format!("Your task: {input}"));
    out
}

/// Prompt asking for a corrected version of the active cell.
pub fn debug_error_prompt(
    variables: &[Variable],
    active_code: &str,
    error: &str,
    language: &str,
) -> String {
    let mut out = format!(
        "You are an expert {language} programmer debugging a Jupyter notebook. \
         Running the active code cell raised an error.\n\n\
         Respond with the complete corrected code cell in a single fenced code block, \
         followed by a short explanation of what caused the error.\n\n"
    );
    out.push_str(RULES);
    out.push_str("\n\n");
    push_context(&mut out, variables, active_code, language);
    out.push_str(&format!("Error:\n\n```\n{error}\n```\n\nYour task: fix the error."));
    out
}

/// Prompt asking for an explanation of the active cell.
pub fn explain_code_prompt(active_code: &str, language: &str) -> String {
    format!(
        "You are an expert {language} programmer. Explain what the following code does \
         in plain language, step by step. Do not rewrite the code.\n\n\
         ```{language}\n{active_code}\n```"
    )
}

fn push_context(out: &mut String, variables: &[Variable], active_code: &str, language: &str) {
    out.push_str("Defined Variables:\n\n");
    for variable in variables {
        out.push_str(&serde_json::to_string_pretty(variable).unwrap_or_default());
        out.push('\n');
    }
    out.push_str(&format!(
        "\nCode in the active code cell:\n\n```{language}\n{active_code}\n```\n\n"
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> Vec<Variable> {
        vec![Variable {
            name: "df".to_string(),
            type_name: "pd.DataFrame".to_string(),
            value: json!({"a": [1, 2]}),
        }]
    }

    #[test]
    fn basic_prompt_carries_rules_context_and_task() {
        let prompt = basic_prompt(&vars(), "x = 1", "write a loop", "python");
        assert!(prompt.starts_with("You are an expert python programmer"));
        assert!(prompt.contains("Do not use the word \"I\""));
        assert!(prompt.contains("<Example>"));
        assert!(prompt.contains(r#""type": "pd.DataFrame""#));
        assert!(prompt.contains("```python\nx = 1\n```"));
        assert!(prompt.ends_with("Your task: write a loop"));
    }

    #[test]
    fn debug_prompt_includes_error_text() {
        let prompt = debug_error_prompt(
            &[],
            "print(y)",
            "NameError: name 'y' is not defined",
            "python",
        );
        assert!(prompt.contains("NameError: name 'y' is not defined"));
        assert!(prompt.contains("```python\nprint(y)\n```"));
        assert!(prompt.ends_with("fix the error."));
    }

    #[test]
    fn explain_prompt_fences_the_cell() {
        let prompt = explain_code_prompt("a = 1", "python");
        assert!(prompt.contains("Do not rewrite the code."));
        assert!(prompt.ends_with("```python\na = 1\n```"));
    }

    #[test]
    fn variable_serializes_type_field() {
        let value = serde_json::to_value(&vars()[0]).expect("serialize");
        assert_eq!(value["type"], "pd.DataFrame");
        assert_eq!(value["name"], "df");
    }
}
