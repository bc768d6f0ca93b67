//! 请求体校验 (validator)

use validator::{Validate, ValidationErrors};

use super::AppError;

/// Run `validator` rules and map failures to a `validation_error`
pub fn validate<T: Validate>(payload: &T) -> Result<(), AppError> {
    payload.validate().map_err(validation_error)
}

fn validation_error(errors: ValidationErrors) -> AppError {
    let mut err = AppError::validation(format!("Validation failed: {}", errors));
    for (field, field_errors) in errors.field_errors() {
        let codes: Vec<String> = field_errors.iter().map(|e| e.code.to_string()).collect();
        err = err.with_detail(field.to_string(), codes.join(","));
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::QuantityUpdate;

    #[test]
    fn test_validation_error_lists_fields() {
        let err = validate(&QuantityUpdate { quantity: 0 }).unwrap_err();
        assert_eq!(err.kind(), "validation_error");
        assert!(err.details.unwrap().contains_key("quantity"));
    }

    #[test]
    fn test_valid_payload_passes() {
        assert!(validate(&QuantityUpdate { quantity: 3 }).is_ok());
    }
}
