//! Built-in task prompt.

/// Asks for one method on the FastAPI application class, code only.
pub const DEFAULT_TASK_PROMPT: &str = "\
Write a new method for the FastAPI class called 'secure_headers'.
It should add 'X-Frame-Options: DENY' and 'X-Content-Type-Options: nosniff' to every response.
Provide ONLY the Python code for the method. Do not include the class definition, just the function.
";
