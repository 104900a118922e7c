use std::rc::Rc;

#[cfg(feature = "ast-json")]
use serde::{Deserialize, Serialize};

use crate::{
    eval::error::EvalError,
    object::{Object, StringCollection, arg, not_found},
    value::Value,
};

/// The parts of an HTTP request a script can observe.
#[cfg_attr(feature = "ast-json", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "ast-json", serde(default))]
#[derive(Debug, Clone, PartialEq)]
pub struct RequestData {
    pub method: String,
    pub path: String,
    pub query_string: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
    pub cookies: Vec<(String, String)>,
    pub server_variables: Vec<(String, String)>,
    pub body: String,
}

impl Default for RequestData {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            path: "/".to_string(),
            query_string: Vec::new(),
            form: Vec::new(),
            cookies: Vec::new(),
            server_variables: Vec::new(),
            body: String::new(),
        }
    }
}

impl RequestData {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            ..Self::default()
        }
    }

    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query_string.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_form(mut self, key: &str, value: &str) -> Self {
        self.form.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_cookie(mut self, key: &str, value: &str) -> Self {
        self.cookies.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_server_variable(mut self, key: &str, value: &str) -> Self {
        self.server_variables
            .push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// The raw query string rebuilt from its pairs.
    fn raw_query(&self) -> String {
        self.query_string
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// The script-visible `Request` object.
#[derive(Debug)]
pub struct RequestObject {
    query_string: Rc<StringCollection>,
    form: Rc<StringCollection>,
    cookies: Rc<StringCollection>,
    server_variables: Rc<StringCollection>,
    total_bytes: usize,
}

impl RequestObject {
    pub fn new(data: &RequestData) -> Self {
        let mut server_variables =
            StringCollection::from_pairs("IRequestDictionary", data.server_variables.iter().cloned());
        for (key, value) in [
            ("REQUEST_METHOD", data.method.clone()),
            ("PATH_INFO", data.path.clone()),
            ("SCRIPT_NAME", data.path.clone()),
            ("QUERY_STRING", data.raw_query()),
            ("CONTENT_LENGTH", data.body.len().to_string()),
        ] {
            if server_variables.get(key).is_none() {
                server_variables.push(key, value);
            }
        }

        Self {
            query_string: Rc::new(StringCollection::from_pairs(
                "IRequestDictionary",
                data.query_string.iter().cloned(),
            )),
            form: Rc::new(StringCollection::from_pairs(
                "IRequestDictionary",
                data.form.iter().cloned(),
            )),
            cookies: Rc::new(StringCollection::from_pairs(
                "IRequestDictionary",
                data.cookies.iter().cloned(),
            )),
            server_variables: Rc::new(server_variables),
            total_bytes: data.body.len(),
        }
    }

    fn collection(&self, name: &str) -> Option<&Rc<StringCollection>> {
        match name {
            "querystring" => Some(&self.query_string),
            "form" => Some(&self.form),
            "cookies" => Some(&self.cookies),
            "servervariables" => Some(&self.server_variables),
            _ => None,
        }
    }

    /// `Request(key)` searches every collection in turn.
    fn lookup(&self, key: &str) -> Value {
        [
            &self.query_string,
            &self.form,
            &self.cookies,
            &self.server_variables,
        ]
        .into_iter()
        .find_map(|collection| collection.get(key))
        .map(Value::from)
        .unwrap_or_default()
    }
}

impl Object for RequestObject {
    fn type_name(&self) -> &str {
        "IRequest"
    }

    fn get_property(&self, name: &str) -> Result<Value, EvalError> {
        if let Some(collection) = self.collection(name) {
            let collection: Rc<dyn Object> = Rc::clone(collection) as Rc<dyn Object>;
            return Ok(Value::Object(collection));
        }
        match name {
            "totalbytes" => Ok(Value::from(self.total_bytes)),
            _ => Err(not_found(self, name)),
        }
    }

    fn set_property(&self, name: &str, _value: Value) -> Result<(), EvalError> {
        Err(EvalError::PropertyNotWritable(format!("Request.{}", name)))
    }

    fn call_method(&self, name: &str, args: &[Value]) -> Result<Value, EvalError> {
        match (self.collection(name), name) {
            (Some(_), _) if args.is_empty() => self.get_property(name),
            (Some(collection), _) => collection.call_method("", args),
            (None, "item" | "") => Ok(self.lookup(&arg(args, 0).to_string())),
            (None, "totalbytes") => self.get_property(name),
            _ => Err(not_found(self, name)),
        }
    }
}
