use std::{
    cell::RefCell,
    rc::Rc,
};

use crate::{
    eval::{
        error::EvalError,
        flow::{Halt, RequestControl},
    },
    object::{Object, arg, not_found},
    value::Value,
};

/// Everything a script produced for the HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseData {
    pub status: String,
    pub content_type: String,
    pub charset: Option<String>,
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<(String, String)>,
    pub body: String,
    pub buffer: bool,
    /// Minutes until the client should consider the page stale.
    pub expires: Option<i64>,
    /// Lines passed to `Response.AppendToLog`.
    pub log: Vec<String>,
    pub redirect: Option<String>,
}

impl Default for ResponseData {
    fn default() -> Self {
        Self {
            status: "200 OK".to_string(),
            content_type: "text/html".to_string(),
            charset: None,
            headers: Vec::new(),
            cookies: Vec::new(),
            body: String::new(),
            buffer: true,
            expires: None,
            log: Vec::new(),
            redirect: None,
        }
    }
}

impl ResponseData {
    /// The numeric part of the status line.
    pub fn status_code(&self) -> u16 {
        self.status
            .split_whitespace()
            .next()
            .and_then(|code| code.parse().ok())
            .unwrap_or(200)
    }
}

type CookieJar = Rc<RefCell<Vec<(String, String)>>>;

/// The script-visible `Response` object.
#[derive(Debug)]
pub struct ResponseObject {
    data: RefCell<ResponseData>,
    cookies: CookieJar,
    control: Rc<RequestControl>,
}

impl ResponseObject {
    pub fn new(control: Rc<RequestControl>) -> Self {
        Self {
            data: RefCell::new(ResponseData::default()),
            cookies: Rc::default(),
            control,
        }
    }

    pub fn write(&self, text: &str) {
        self.data.borrow_mut().body.push_str(text);
    }

    pub fn output(&self) -> String {
        self.data.borrow().body.clone()
    }

    /// Takes the produced response, leaving a fresh one behind.
    pub fn take(&self) -> ResponseData {
        let mut data = self.data.take();
        data.cookies = std::mem::take(&mut *self.cookies.borrow_mut());
        data
    }

    fn end(&self) {
        self.control.request_halt(Halt::End);
    }

    fn redirect(&self, url: String) {
        {
            let mut data = self.data.borrow_mut();
            data.status = "302 Object moved".to_string();
            data.headers.push(("Location".to_string(), url.clone()));
            data.body.clear();
            data.redirect = Some(url.clone());
        }
        self.control.request_halt(Halt::Redirect(url));
    }
}

impl Object for ResponseObject {
    fn type_name(&self) -> &str {
        "IResponse"
    }

    fn get_property(&self, name: &str) -> Result<Value, EvalError> {
        let data = self.data.borrow();
        match name {
            "contenttype" => Ok(Value::from(data.content_type.as_str())),
            "charset" => Ok(data.charset.as_deref().map(Value::from).unwrap_or_default()),
            "status" => Ok(Value::from(data.status.as_str())),
            "buffer" => Ok(Value::from(data.buffer)),
            "expires" => Ok(data.expires.map(Value::from).unwrap_or_default()),
            "cookies" => Ok(Value::Object(Rc::new(ResponseCookies {
                jar: Rc::clone(&self.cookies),
            }))),
            "isclientconnected" => Ok(Value::TRUE),
            _ => Err(not_found(self, name)),
        }
    }

    fn set_property(&self, name: &str, value: Value) -> Result<(), EvalError> {
        let mut data = self.data.borrow_mut();
        match name {
            "contenttype" => data.content_type = value.to_string(),
            "charset" => data.charset = Some(value.to_string()),
            "status" => data.status = value.to_string(),
            "buffer" => data.buffer = value.is_truthy(),
            "expires" => data.expires = Some(value.to_int()),
            _ => return Err(not_found(self, name)),
        }
        Ok(())
    }

    fn call_method(&self, name: &str, args: &[Value]) -> Result<Value, EvalError> {
        match name {
            "write" => self.write(&arg(args, 0).to_string()),
            "binarywrite" => self.write(&arg(args, 0).to_string()),
            "end" => self.end(),
            "redirect" => self.redirect(arg(args, 0).to_string()),
            "clear" => self.data.borrow_mut().body.clear(),
            "flush" => {}
            "addheader" => self
                .data
                .borrow_mut()
                .headers
                .push((arg(args, 0).to_string(), arg(args, 1).to_string())),
            "appendtolog" => {
                let line = arg(args, 0).to_string();
                tracing::info!(target: "asp_lang::response", "{}", line);
                self.data.borrow_mut().log.push(line);
            }
            "cookies" if !args.is_empty() => {
                return ResponseCookies {
                    jar: Rc::clone(&self.cookies),
                }
                .call_method("", args);
            }
            _ => return self.get_property(name),
        }
        Ok(Value::Empty)
    }
}

/// `Response.Cookies`: written by `Response.Cookies(name) = value`.
#[derive(Debug)]
struct ResponseCookies {
    jar: CookieJar,
}

impl Object for ResponseCookies {
    fn type_name(&self) -> &str {
        "IRequestDictionary"
    }

    fn get_property(&self, name: &str) -> Result<Value, EvalError> {
        match name {
            "count" => Ok(Value::from(self.jar.borrow().len())),
            _ => Err(not_found(self, name)),
        }
    }

    fn set_property(&self, name: &str, _value: Value) -> Result<(), EvalError> {
        Err(not_found(self, name))
    }

    fn call_method(&self, name: &str, args: &[Value]) -> Result<Value, EvalError> {
        match name {
            "item" | "" => {
                let key = arg(args, 0).to_string();
                Ok(self
                    .jar
                    .borrow()
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(&key))
                    .map(|(_, value)| Value::from(value.as_str()))
                    .unwrap_or_default())
            }
            "count" => self.get_property(name),
            _ => Err(not_found(self, name)),
        }
    }

    fn enumerate(&self) -> Option<Vec<Value>> {
        Some(
            self.jar
                .borrow()
                .iter()
                .map(|(key, _)| Value::from(key.as_str()))
                .collect(),
        )
    }

    fn set_item(&self, args: &[Value], value: Value) -> Result<(), EvalError> {
        let key = arg(args, 0).to_string();
        let value = value.to_string();
        let mut jar = self.jar.borrow_mut();
        match jar.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&key)) {
            Some((_, existing)) => *existing = value,
            None => jar.push((key, value)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response() -> (ResponseObject, Rc<RequestControl>) {
        let control = Rc::new(RequestControl::default());
        (ResponseObject::new(Rc::clone(&control)), control)
    }

    #[test]
    fn test_write_and_clear() {
        let (response, _) = response();
        response.call_method("write", &[Value::from("a")]).unwrap();
        response.call_method("write", &[Value::from(1)]).unwrap();
        assert_eq!(response.output(), "a1");
        response.call_method("clear", &[]).unwrap();
        assert_eq!(response.output(), "");
    }

    #[test]
    fn test_end_requests_halt() {
        let (response, control) = response();
        response.call_method("end", &[]).unwrap();
        assert_eq!(control.halted(), Some(Halt::End));
    }

    #[test]
    fn test_redirect() {
        let (response, control) = response();
        response.write("discarded");
        response
            .call_method("redirect", &[Value::from("/login.asp")])
            .unwrap();

        let data = response.take();
        assert_eq!(data.status_code(), 302);
        assert_eq!(data.redirect.as_deref(), Some("/login.asp"));
        assert_eq!(data.body, "");
        assert!(data.headers.contains(&("Location".to_string(), "/login.asp".to_string())));
        assert_eq!(control.halted(), Some(Halt::Redirect("/login.asp".to_string())));
    }

    #[test]
    fn test_cookies() {
        let (response, _) = response();
        let Value::Object(cookies) = response.get_property("cookies").unwrap() else {
            panic!("cookies should be an object");
        };
        cookies
            .set_item(&[Value::from("theme")], Value::from("dark"))
            .unwrap();
        cookies
            .set_item(&[Value::from("THEME")], Value::from("light"))
            .unwrap();

        assert_eq!(
            response.call_method("cookies", &[Value::from("theme")]),
            Ok(Value::from("light"))
        );
        assert_eq!(
            response.take().cookies,
            vec![("theme".to_string(), "light".to_string())]
        );
    }

    #[test]
    fn test_properties() {
        let (response, _) = response();
        response
            .set_property("contenttype", Value::from("text/plain"))
            .unwrap();
        response.set_property("status", Value::from("404 Not Found")).unwrap();
        assert_eq!(response.get_property("contenttype"), Ok(Value::from("text/plain")));
        assert_eq!(response.take().status_code(), 404);
    }
}
