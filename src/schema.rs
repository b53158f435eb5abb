use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ValidationError;

const MIN_PASSWORD_LENGTH: usize = 8;
const MAX_PASSWORD_LENGTH: usize = 128;

/// Turns a deserialized wire payload into its checked domain input.
pub trait Validate {
    type Output;

    fn validate(self) -> Result<Self::Output, ValidationError>;
}

/// Deserializes and validates a procedure input. A missing input is treated as `null`.
pub fn parse_input<S>(input: Option<Value>) -> Result<S::Output, ValidationError>
where
    S: DeserializeOwned + Validate,
{
    let schema: S = serde_json::from_value(input.unwrap_or(Value::Null))
        .map_err(|e| ValidationError::single("input", e.to_string()))?;
    schema.validate()
}

// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`)
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn parse_id(raw: &str, errors: &mut ValidationError) -> Option<Uuid> {
    match Uuid::parse_str(raw) {
        Ok(id) => Some(id),
        Err(_) => {
            errors.push("id", "must be a valid UUID");
            None
        }
    }
}

fn check_title(title: &str, errors: &mut ValidationError) {
    if title.is_empty() {
        errors.push("title", "must contain at least 1 character");
    }
}

/// Validated input of `todo.create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTodo {
    pub title: String,
    pub description: Option<String>,
}

/// Columns touched by an update; `None` leaves a column unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TodoPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub completed: Option<bool>,
}

/// Validated input of `todo.update`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateTodo {
    pub id: Uuid,
    pub patch: TodoPatch,
}

// Struct representing the request body for creating a new Todo
#[derive(Debug, Deserialize)]
pub struct CreateTodoSchema {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl Validate for CreateTodoSchema {
    type Output = NewTodo;

    fn validate(self) -> Result<NewTodo, ValidationError> {
        let mut errors = ValidationError::default();
        check_title(&self.title, &mut errors);
        errors.finish(NewTodo {
            title: self.title,
            description: self.description.filter(|d| !d.is_empty()),
        })
    }
}

// Struct representing the request body for updating a Todo
#[derive(Debug, Deserialize)]
pub struct UpdateTodoSchema {
    pub id: String,
    #[serde(default, deserialize_with = "present")]
    pub title: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub completed: Option<Option<bool>>,
}

impl Validate for UpdateTodoSchema {
    type Output = UpdateTodo;

    fn validate(self) -> Result<UpdateTodo, ValidationError> {
        let mut errors = ValidationError::default();
        let id = parse_id(&self.id, &mut errors);

        let title = match self.title {
            Some(Some(title)) => {
                check_title(&title, &mut errors);
                Some(title)
            }
            Some(None) => {
                errors.push("title", "must be a string when present");
                None
            }
            None => None,
        };
        let completed = match self.completed {
            Some(None) => {
                errors.push("completed", "must be a boolean when present");
                None
            }
            other => other.flatten(),
        };

        match id {
            Some(id) => errors.finish(UpdateTodo {
                id,
                patch: TodoPatch {
                    title,
                    description: self.description,
                    completed,
                },
            }),
            None => Err(errors),
        }
    }
}

/// Input of the procedures addressing a single todo by id.
#[derive(Debug, Deserialize)]
pub struct TodoIdSchema {
    pub id: String,
}

impl Validate for TodoIdSchema {
    type Output = Uuid;

    fn validate(self) -> Result<Uuid, ValidationError> {
        let mut errors = ValidationError::default();
        match parse_id(&self.id, &mut errors) {
            Some(id) => Ok(id),
            None => Err(errors),
        }
    }
}

/// Validated sign-up request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password: String,
}

/// Validated email/password pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

fn normalize_email(raw: &str, errors: &mut ValidationError) -> String {
    let email = raw.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        errors.push("email", "must be a valid email address");
    }
    email
}

#[derive(Debug, Deserialize)]
pub struct SignUpSchema {
    pub email: String,
    pub name: String,
    pub password: String,
}

impl Validate for SignUpSchema {
    type Output = NewUser;

    fn validate(self) -> Result<NewUser, ValidationError> {
        let mut errors = ValidationError::default();
        let email = normalize_email(&self.email, &mut errors);
        if self.name.is_empty() {
            errors.push("name", "must contain at least 1 character");
        }
        let length = self.password.chars().count();
        if length < MIN_PASSWORD_LENGTH {
            errors.push(
                "password",
                format!("must contain at least {MIN_PASSWORD_LENGTH} characters"),
            );
        } else if length > MAX_PASSWORD_LENGTH {
            errors.push(
                "password",
                format!("must contain at most {MAX_PASSWORD_LENGTH} characters"),
            );
        }
        errors.finish(NewUser {
            email,
            name: self.name,
            password: self.password,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct SignInSchema {
    pub email: String,
    pub password: String,
}

impl Validate for SignInSchema {
    type Output = Credentials;

    fn validate(self) -> Result<Credentials, ValidationError> {
        let mut errors = ValidationError::default();
        let email = normalize_email(&self.email, &mut errors);
        if self.password.is_empty() {
            errors.push("password", "must contain at least 1 character");
        }
        errors.finish(Credentials {
            email,
            password: self.password,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct DeleteUserSchema {
    pub password: String,
}

impl Validate for DeleteUserSchema {
    type Output = String;

    fn validate(self) -> Result<String, ValidationError> {
        if self.password.is_empty() {
            return Err(ValidationError::single(
                "password",
                "must contain at least 1 character",
            ));
        }
        Ok(self.password)
    }
}
